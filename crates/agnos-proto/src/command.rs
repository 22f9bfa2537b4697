//! Command and reply codes.
//!
//! A request payload starts with a command byte; every reply that has a body
//! starts with a reply byte. Both are signed 8-bit on the wire.

/// Command codes, the first byte of a request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum Command {
    /// Echo a string payload back to the caller.
    Ping = 0,
    /// Invoke a function by id with packed arguments.
    Invoke = 1,
    /// Fire-and-forget session end; no reply is sent.
    Quit = 2,
    /// Drop one reference to a server-resident object.
    Decref = 3,
    /// Add one reference to a server-resident object.
    Incref = 4,
    /// Fetch service metadata as a HeteroMap.
    GetInfo = 5,
}

impl Command {
    /// Decode a wire byte; `None` for codes this protocol does not define.
    pub fn from_wire(raw: i8) -> Option<Self> {
        match raw {
            0 => Some(Self::Ping),
            1 => Some(Self::Invoke),
            2 => Some(Self::Quit),
            3 => Some(Self::Decref),
            4 => Some(Self::Incref),
            5 => Some(Self::GetInfo),
            _ => None,
        }
    }

    /// The wire byte.
    pub const fn to_wire(self) -> i8 {
        self as i8
    }
}

/// Reply codes, the first byte of a reply body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum ReplyCode {
    /// The command succeeded; the per-command payload follows.
    Success = 0,
    /// Protocol violation; a message string follows.
    ProtocolError = 1,
    /// User-defined exception; a class id and packed fields follow.
    PackedException = 2,
    /// Unmodeled handler failure; message and traceback strings follow.
    GenericException = 3,
}

impl ReplyCode {
    /// Decode a wire byte; `None` for codes this protocol does not define.
    pub fn from_wire(raw: i8) -> Option<Self> {
        match raw {
            0 => Some(Self::Success),
            1 => Some(Self::ProtocolError),
            2 => Some(Self::PackedException),
            3 => Some(Self::GenericException),
            _ => None,
        }
    }

    /// The wire byte.
    pub const fn to_wire(self) -> i8 {
        self as i8
    }
}

/// GETINFO request code: the meta map of available codes and capabilities.
pub const INFO_META: i32 = 0;
/// GETINFO request code: service identity (name, version, IDL magic).
pub const INFO_GENERAL: i32 = 1;
/// GETINFO request code: descriptions of exposed functions.
pub const INFO_FUNCTIONS: i32 = 2;
/// GETINFO request code: numeric function code to name mapping.
pub const INFO_FUNCCODES: i32 = 3;

/// Conventional `INFO_GENERAL` key for the service name.
pub const KEY_SERVICE_NAME: &str = "SERVICE_NAME";
/// Conventional `INFO_GENERAL` key for the service version string.
pub const KEY_SERVICE_VERSION: &str = "SERVICE_VERSION";
/// Conventional `INFO_GENERAL` key for the IDL digest the stubs were
/// generated from.
pub const KEY_IDL_MAGIC: &str = "IDL_MAGIC";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_round_trip() {
        for raw in 0..=5 {
            let cmd = Command::from_wire(raw).unwrap();
            assert_eq!(cmd.to_wire(), raw);
        }
        assert_eq!(Command::from_wire(6), None);
        assert_eq!(Command::from_wire(-1), None);
    }

    #[test]
    fn reply_codes_round_trip() {
        for raw in 0..=3 {
            let code = ReplyCode::from_wire(raw).unwrap();
            assert_eq!(code.to_wire(), raw);
        }
        assert_eq!(ReplyCode::from_wire(4), None);
    }
}
