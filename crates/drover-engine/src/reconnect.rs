//! Replacement-spawn delays per termination cause.

use std::time::Duration;

use drover_core::agent::TerminationCause;

pub const END_DELAY: Duration = Duration::from_secs(5);
pub const ERROR_DELAY: Duration = Duration::from_secs(5);
pub const KICK_DELAY: Duration = Duration::from_secs(10);

pub struct ReconnectPolicy;

impl ReconnectPolicy {
    /// Base delay before a replacement, `None` when the cause never reconnects.
    ///
    /// Network errors (reset, timeout) mean the server is refusing us; they
    /// are not retried. A bare close carries no cause and is treated the same.
    pub fn delay_for(cause: &TerminationCause) -> Option<Duration> {
        match cause {
            TerminationCause::Error(e) if e.is_network() => None,
            TerminationCause::Error(_) => Some(ERROR_DELAY),
            TerminationCause::Ended => Some(END_DELAY),
            TerminationCause::Kicked(_) => Some(KICK_DELAY),
            TerminationCause::Closed
            | TerminationCause::CreateFailed(_)
            | TerminationCause::Retired => None,
        }
    }

    /// Policy delay floored by the configured join delay.
    pub fn replacement_delay(cause: &TerminationCause, join_delay: Duration) -> Option<Duration> {
        Self::delay_for(cause).map(|d| d.max(join_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::errors::SessionError;

    #[test]
    fn network_errors_never_reconnect() {
        for e in [SessionError::ConnectionReset, SessionError::TimedOut] {
            assert_eq!(ReconnectPolicy::delay_for(&TerminationCause::Error(e)), None);
        }
    }

    #[test]
    fn cause_specific_delays() {
        assert_eq!(ReconnectPolicy::delay_for(&TerminationCause::Ended), Some(END_DELAY));
        assert_eq!(
            ReconnectPolicy::delay_for(&TerminationCause::Kicked("banned".into())),
            Some(KICK_DELAY)
        );
        assert_eq!(
            ReconnectPolicy::delay_for(&TerminationCause::Error(SessionError::Protocol("x".into()))),
            Some(ERROR_DELAY)
        );
        assert_eq!(ReconnectPolicy::delay_for(&TerminationCause::Closed), None);
        assert_eq!(ReconnectPolicy::delay_for(&TerminationCause::Retired), None);
    }

    #[test]
    fn join_delay_is_a_floor() {
        let kicked = TerminationCause::Kicked("x".into());
        assert_eq!(
            ReconnectPolicy::replacement_delay(&kicked, Duration::from_millis(500)),
            Some(KICK_DELAY)
        );
        assert_eq!(
            ReconnectPolicy::replacement_delay(&kicked, Duration::from_secs(30)),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            ReconnectPolicy::replacement_delay(&TerminationCause::Closed, Duration::from_secs(30)),
            None
        );
    }
}
