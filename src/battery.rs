use crate::protocol::Telemetry;
use crate::ring::ByteRing;
use crate::transport::NotifyHandle;
use std::fmt;

/// State kept for one physical battery pack.
#[derive(Debug, Clone)]
pub struct BatteryRecord {
    identity: String,
    pub(crate) handle: Option<NotifyHandle>,
    pub(crate) ring: ByteRing,
    telemetry: Option<Telemetry>,
}

impl BatteryRecord {
    pub fn new(identity: impl Into<String>, ring_capacity: usize) -> Self {
        Self {
            identity: identity.into(),
            handle: None,
            ring: ByteRing::new(ring_capacity),
            telemetry: None,
        }
    }

    /// Address or name the battery was registered with.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Handle notifications arrive on, while a session is subscribed.
    pub fn handle(&self) -> Option<NotifyHandle> {
        self.handle
    }

    pub fn ring(&self) -> &ByteRing {
        &self.ring
    }

    /// Latest successfully decoded frame, `None` until the first one.
    pub fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_ref()
    }

    pub(crate) fn store(&mut self, telemetry: Telemetry) {
        self.telemetry = Some(telemetry);
    }
}

impl fmt::Display for BatteryRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "BatteryInfo for {}", self.identity)?;
        writeln!(f, "-=-=-=-=-=-=-=-=-=-")?;
        match &self.telemetry {
            Some(telemetry) => write!(f, "{telemetry}"),
            None => writeln!(f, "No telemetry received yet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record() {
        let record = BatteryRecord::new("a4:c1:38:00:00:01", 128);
        assert_eq!(record.identity(), "a4:c1:38:00:00:01");
        assert!(record.handle().is_none());
        assert!(record.telemetry().is_none());
        assert_eq!(record.ring().capacity(), 128);
        assert!(record.to_string().contains("No telemetry received yet"));
    }

    #[test]
    fn store_replaces_snapshot() {
        let mut record = BatteryRecord::new("pack", 16);
        record.store(Telemetry {
            soc_percent: 50,
            ..Default::default()
        });
        record.store(Telemetry {
            soc_percent: 51,
            ..Default::default()
        });
        assert_eq!(record.telemetry().map(|t| t.soc_percent), Some(51));
        assert!(record.to_string().starts_with("BatteryInfo for pack\n"));
    }
}
