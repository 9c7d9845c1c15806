//! Heart-beat negotiation.
//!
//! Each side declares `outgoing,incoming` in milliseconds. A direction is
//! active only when both the sender and the receiver ask for it, and then
//! runs at the slower of the two rates.

use std::time::Duration;

use tracing::warn;

/// A heart-beat declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    /// How often the declaring side can send.
    pub outgoing: Duration,
    /// How often the declaring side wants to receive.
    pub incoming: Duration,
}

impl Heartbeat {
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    /// Header value, e.g. `10000,10000`.
    pub fn to_header(&self) -> String {
        format!(
            "{},{}",
            self.outgoing.as_millis(),
            self.incoming.as_millis()
        )
    }
}

/// Timers to run for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// Period of outgoing pings, if any.
    pub ping_interval: Option<Duration>,
    /// Period of the incoming-activity check, if any.
    pub watchdog_interval: Option<Duration>,
}

/// Parse a `heart-beat` header value.
///
/// Returns `None` when the value is not two comma-separated integers.
pub fn parse_heartbeat_header(value: &str) -> Option<Heartbeat> {
    let (outgoing, incoming) = value.split_once(',')?;
    let outgoing = outgoing.trim().parse::<u64>().ok()?;
    let incoming = incoming.trim().parse::<u64>().ok()?;
    Some(Heartbeat {
        outgoing: Duration::from_millis(outgoing),
        incoming: Duration::from_millis(incoming),
    })
}

/// Combine the local declaration with the broker's `heart-beat` header.
pub fn negotiate(local: Heartbeat, server_header: &str) -> Negotiated {
    let Some(server) = parse_heartbeat_header(server_header) else {
        warn!(header = server_header, "ignoring malformed heart-beat header");
        return Negotiated::default();
    };

    let ping_interval = (!local.outgoing.is_zero() && !server.incoming.is_zero())
        .then(|| local.outgoing.max(server.incoming));
    let watchdog_interval = (!local.incoming.is_zero() && !server.outgoing.is_zero())
        .then(|| local.incoming.max(server.outgoing));

    Negotiated {
        ping_interval,
        watchdog_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn picks_slower_rate_per_direction() {
        let local = Heartbeat::new(ms(5000), ms(3000));
        let negotiated = negotiate(local, "4000,6000");
        assert_eq!(negotiated.ping_interval, Some(ms(6000)));
        assert_eq!(negotiated.watchdog_interval, Some(ms(4000)));
    }

    #[test]
    fn zero_disables_a_direction() {
        let local = Heartbeat::new(ms(5000), ms(3000));
        assert_eq!(
            negotiate(local, "0,6000"),
            Negotiated {
                ping_interval: Some(ms(6000)),
                watchdog_interval: None,
            }
        );
        assert_eq!(negotiate(local, "4000,0").ping_interval, None);

        let silent = Heartbeat::new(ms(0), ms(0));
        assert_eq!(negotiate(silent, "4000,6000"), Negotiated::default());
    }

    #[test]
    fn header_format_and_parse() {
        assert_eq!(Heartbeat::new(ms(10_000), ms(0)).to_header(), "10000,0");
        assert_eq!(
            parse_heartbeat_header(" 100 , 200 "),
            Some(Heartbeat::new(ms(100), ms(200)))
        );
        assert_eq!(parse_heartbeat_header("100"), None);
        assert_eq!(parse_heartbeat_header("a,b"), None);
        assert_eq!(
            negotiate(Heartbeat::new(ms(1), ms(1)), "junk"),
            Negotiated::default()
        );
    }
}
