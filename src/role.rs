//! Role arbiter - decides MASTER vs CLIENT at the end of a negotiation.
//!
//! The longer-running node is MASTER: after one side reboots, the side
//! that stayed up keeps authority and the fresh node mirrors it.  Equal
//! uptimes fall back to the address, smaller address first.

use core::cmp::Ordering;

use crate::ble::Address;
use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Role {
    Unassigned = 0,
    Master = 1,
    Client = 2,
}

impl Role {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Role::Master,
            2 => Role::Client,
            _ => Role::Unassigned,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Unassigned => "UNASSIGNED",
            Role::Master => "MASTER",
            Role::Client => "CLIENT",
        }
    }
}

/// Which rule settled the decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reason {
    /// Local node has been up longer.
    LongerUptime,
    /// Remote node has been up longer.
    ShorterUptime,
    /// Equal uptimes, settled by address order.
    AddressTieBreak,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Decision {
    pub role: Role,
    pub reason: Reason,
}

/// Decide this node's role from both uptimes and both addresses.
///
/// Equal uptimes *and* equal addresses cannot be ordered; that state is
/// rejected with [`Error::AmbiguousRole`].
pub fn decide(
    local_uptime: u32,
    remote_uptime: u32,
    local: Address,
    remote: Address,
) -> Result<Decision, Error> {
    let decision = match local_uptime.cmp(&remote_uptime) {
        Ordering::Greater => Decision {
            role: Role::Master,
            reason: Reason::LongerUptime,
        },
        Ordering::Less => Decision {
            role: Role::Client,
            reason: Reason::ShorterUptime,
        },
        Ordering::Equal => match local.cmp(&remote) {
            Ordering::Less => Decision {
                role: Role::Master,
                reason: Reason::AddressTieBreak,
            },
            Ordering::Greater => Decision {
                role: Role::Client,
                reason: Reason::AddressTieBreak,
            },
            Ordering::Equal => return Err(Error::AmbiguousRole),
        },
    };
    Ok(decision)
}
