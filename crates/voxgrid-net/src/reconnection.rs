//! Client-side reconnection with exponential backoff and jitter.

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;

use crate::client::SyncClient;
use crate::framing::FrameConfig;

/// Configuration for client-side reconnection behaviour.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 500 ms.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Maximum delay between attempts. Default: 30 s.
    pub max_delay: Duration,
    /// Attempts before giving up. Default: 20.
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0), applied as +/- jitter. Default: 0.25.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 20,
            jitter: 0.25,
        }
    }
}

/// Tracks the attempt count and computes the next backoff delay.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    current_delay: Duration,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        let initial = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay: initial,
        }
    }

    /// Next delay, or `None` once the attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }

        let base = self.current_delay;
        self.attempts += 1;

        let jittered = if self.config.jitter > 0.0 {
            let mut rng = rand::rng();
            let factor = rng.random_range((1.0 - self.config.jitter)..=(1.0 + self.config.jitter));
            base.mul_f64(factor)
        } else {
            base
        };

        let next = self.current_delay.mul_f64(self.config.backoff_multiplier);
        self.current_delay = next.min(self.config.max_delay);

        Some(jittered.min(self.config.max_delay))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Reconnects to `addr`, sleeping with backoff before every attempt.
///
/// Attempts count against `state` across calls until the caller resets it,
/// so a server that accepts but keeps failing the sync is still given up on.
/// The caller restarts the initial sync on the returned client.
pub async fn reconnect_loop(
    addr: SocketAddr,
    state: &mut ReconnectState,
    frame: FrameConfig,
) -> Result<SyncClient, ReconnectError> {
    loop {
        let Some(delay) = state.next_delay() else {
            return Err(ReconnectError::MaxAttemptsExhausted(state.attempts()));
        };
        tracing::info!("Reconnection attempt {} in {:?}", state.attempts(), delay);
        tokio::time::sleep(delay).await;

        match SyncClient::connect(addr, frame.clone()).await {
            Ok(client) => {
                tracing::info!("Reconnected after {} attempts", state.attempts());
                return Ok(client);
            }
            Err(e) => {
                tracing::warn!("Reconnection attempt {} failed: {}", state.attempts(), e);
            }
        }
    }
}

/// Errors produced by the reconnection system.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    #[error("gave up after {0} reconnection attempts")]
    MaxAttemptsExhausted(u32),
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    fn config_no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_sequence_is_exponential() {
        let mut state = ReconnectState::new(config_no_jitter());
        let delays: Vec<_> = (0..4).map(|_| state.next_delay().unwrap()).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn test_max_backoff_is_capped() {
        let mut state = ReconnectState::new(config_no_jitter());
        let last = (0..15).filter_map(|_| state.next_delay()).last().unwrap();
        assert_eq!(last, Duration::from_secs(30));
    }

    #[test]
    fn test_max_attempts_exhausted() {
        let mut state = ReconnectState::new(ReconnectConfig {
            max_attempts: 3,
            jitter: 0.0,
            ..Default::default()
        });
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_none());
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut state = ReconnectState::new(config_no_jitter());
        state.next_delay();
        state.next_delay();
        assert_eq!(state.attempts(), 2);

        state.reset();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        for _ in 0..50 {
            let mut state = ReconnectState::new(ReconnectConfig {
                initial_delay: Duration::from_secs(4),
                jitter: 0.25,
                ..Default::default()
            });
            let delay = state.next_delay().unwrap();
            assert!(delay >= Duration::from_secs(3) && delay <= Duration::from_secs(5));
        }
    }

    #[tokio::test]
    async fn test_reconnect_loop_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _conn = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let mut state = ReconnectState::new(ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        });
        let client = reconnect_loop(addr, &mut state, FrameConfig::default()).await.unwrap();
        assert!(client.is_connected());
        assert_eq!(state.attempts(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_loop_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut state = ReconnectState::new(ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            max_attempts: 2,
            jitter: 0.0,
            ..Default::default()
        });
        let result = reconnect_loop(addr, &mut state, FrameConfig::default()).await;
        assert!(matches!(result, Err(ReconnectError::MaxAttemptsExhausted(2))));

        // The budget is spent until the caller resets it.
        let again = reconnect_loop(addr, &mut state, FrameConfig::default()).await;
        assert!(matches!(again, Err(ReconnectError::MaxAttemptsExhausted(2))));
    }
}
