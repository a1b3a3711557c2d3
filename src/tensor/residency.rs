use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Which copies of a tensor's data are current.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Residency {
    HostOnly,
    DeviceOnly,
    BothValid,
    HostStaleDeviceValid,
    DeviceStaleHostValid,
}

/// Copy a residency transition requires before it can take effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transfer {
    None,
    Upload,
    Download,
}

impl Residency {
    pub fn host_valid(self) -> bool {
        matches!(
            self,
            Residency::HostOnly | Residency::BothValid | Residency::DeviceStaleHostValid
        )
    }

    pub fn device_valid(self) -> bool {
        matches!(
            self,
            Residency::DeviceOnly | Residency::BothValid | Residency::HostStaleDeviceValid
        )
    }

    pub fn ensure_host(self) -> (Residency, Transfer) {
        match self {
            Residency::DeviceOnly | Residency::HostStaleDeviceValid => {
                (Residency::BothValid, Transfer::Download)
            }
            other => (other, Transfer::None),
        }
    }

    pub fn ensure_device(self) -> (Residency, Transfer) {
        match self {
            Residency::HostOnly | Residency::DeviceStaleHostValid => {
                (Residency::BothValid, Transfer::Upload)
            }
            other => (other, Transfer::None),
        }
    }

    /// The device copy was written.
    pub fn invalidate_host(self) -> Residency {
        match self {
            Residency::DeviceOnly => Residency::DeviceOnly,
            _ => Residency::HostStaleDeviceValid,
        }
    }

    /// The host copy was written.
    pub fn invalidate_device(self) -> Residency {
        match self {
            Residency::HostOnly => Residency::HostOnly,
            _ => Residency::DeviceStaleHostValid,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            Residency::HostOnly => 0,
            Residency::DeviceOnly => 1,
            Residency::BothValid => 2,
            Residency::HostStaleDeviceValid => 3,
            Residency::DeviceStaleHostValid => 4,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Residency::HostOnly,
            1 => Residency::DeviceOnly,
            2 => Residency::BothValid,
            3 => Residency::HostStaleDeviceValid,
            4 => Residency::DeviceStaleHostValid,
            other => unreachable!("Invalid residency bits {}", other),
        }
    }
}

impl fmt::Display for Residency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Residency::HostOnly => "host only",
            Residency::DeviceOnly => "device only",
            Residency::BothValid => "both valid",
            Residency::HostStaleDeviceValid => "host stale",
            Residency::DeviceStaleHostValid => "device stale",
        };
        f.write_str(name)
    }
}

/// Residency stored in an atomic so reads never block.
#[derive(Debug)]
pub(crate) struct ResidencyCell(AtomicU8);

impl ResidencyCell {
    pub(crate) fn new(state: Residency) -> Self {
        ResidencyCell(AtomicU8::new(state.to_bits()))
    }

    pub(crate) fn get(&self) -> Residency {
        Residency::from_bits(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: Residency) {
        self.0.store(state.to_bits(), Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ALL: [Residency; 5] = [
        Residency::HostOnly,
        Residency::DeviceOnly,
        Residency::BothValid,
        Residency::HostStaleDeviceValid,
        Residency::DeviceStaleHostValid,
    ];

    #[test]
    fn ensure_makes_side_valid() {
        for state in ALL {
            let (host, transfer) = state.ensure_host();
            assert!(host.host_valid());
            assert_eq!(transfer == Transfer::Download, !state.host_valid());
            let (device, transfer) = state.ensure_device();
            assert!(device.device_valid());
            assert_eq!(transfer == Transfer::Upload, !state.device_valid());
        }
    }

    #[test]
    fn invalidation() {
        assert_eq!(Residency::BothValid.invalidate_host(), Residency::HostStaleDeviceValid);
        assert_eq!(Residency::BothValid.invalidate_device(), Residency::DeviceStaleHostValid);
        assert_eq!(Residency::HostOnly.invalidate_device(), Residency::HostOnly);
        assert_eq!(Residency::DeviceOnly.invalidate_host(), Residency::DeviceOnly);
        assert_eq!(
            Residency::DeviceStaleHostValid.invalidate_host(),
            Residency::HostStaleDeviceValid
        );
    }

    #[test]
    fn cell_round_trips() {
        let cell = ResidencyCell::new(Residency::HostOnly);
        for state in ALL {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }
}
