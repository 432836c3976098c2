//! Device addressing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Addressing key for one tracking unit.
///
/// Different transports correlate on different identifiers: the MQTT
/// transport keys its topics on the IMEI, the SMS transport addresses the SIM
/// by ICCID. A `DeviceId` carries whichever identifiers the caller knows;
/// each transport checks for the one it needs and fails with
/// [`TrackError::MissingDeviceId`](crate::TrackError::MissingDeviceId)
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    imei: Option<String>,
    iccid: Option<String>,
}

impl DeviceId {
    pub fn from_imei(imei: impl Into<String>) -> Self {
        Self { imei: Some(imei.into()), iccid: None }
    }

    pub fn from_iccid(iccid: impl Into<String>) -> Self {
        Self { imei: None, iccid: Some(iccid.into()) }
    }

    pub fn new(imei: impl Into<String>, iccid: impl Into<String>) -> Self {
        Self { imei: Some(imei.into()), iccid: Some(iccid.into()) }
    }

    pub fn imei(&self) -> Option<&str> {
        self.imei.as_deref()
    }

    pub fn iccid(&self) -> Option<&str> {
        self.iccid.as_deref()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.imei, &self.iccid) {
            (Some(imei), _) => write!(f, "imei:{imei}"),
            (None, Some(iccid)) => write!(f, "iccid:{iccid}"),
            (None, None) => f.write_str("device:<unaddressed>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefers_imei() {
        assert_eq!(DeviceId::new("356307042441013", "8944477100002778325").to_string(), "imei:356307042441013");
        assert_eq!(DeviceId::from_iccid("8944477100002778325").to_string(), "iccid:8944477100002778325");
    }
}
