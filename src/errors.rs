//! LMP error codes
//!
//! An `LMP_not_accepted` PDU echoes the opcode of the rejected request along with an error code.
//! The error codes are the controller error codes listed in volume one, part F of the Bluetooth
//! core specification. [`ErrorCode`] turns the raw code into a named value so that rejections are
//! logged with the error *name* instead of just a number.
//!
//! ### `Unknown`
//! A peer can send a code that is not assigned by the Bluetooth SIG, either because it is vendor
//! specific or because the peer is misbehaving (which is itself interesting for fingerprinting).
//! These are kept as `Unknown` with the raw value.

use core::fmt::{self, Display, Formatter};

macro_rules! error_codes {
    ( $( $code:literal => $name:ident, $text:literal; )* ) => {
        /// A controller error code carried within an LMP PDU
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
        pub enum ErrorCode {
            Unknown(u8),
            $( $name, )*
        }

        impl ErrorCode {
            /// Get the raw value of the error code
            pub fn into_code(self) -> u8 {
                match self {
                    ErrorCode::Unknown(raw) => raw,
                    $( ErrorCode::$name => $code, )*
                }
            }

            fn description(&self) -> Option<&'static str> {
                match self {
                    ErrorCode::Unknown(_) => None,
                    $( ErrorCode::$name => Some($text), )*
                }
            }
        }

        impl From<u8> for ErrorCode {
            fn from(raw: u8) -> Self {
                match raw {
                    $( $code => ErrorCode::$name, )*
                    _ => ErrorCode::Unknown(raw),
                }
            }
        }
    };
}

error_codes! {
    0x01 => UnknownHciCommand, "unknown HCI command";
    0x02 => UnknownConnectionIdentifier, "unknown connection identifier";
    0x03 => HardwareFailure, "hardware failure";
    0x04 => PageTimeout, "page timeout";
    0x05 => AuthenticationFailure, "authentication failure";
    0x06 => PinOrKeyMissing, "PIN or key missing";
    0x07 => MemoryCapacityExceeded, "memory capacity exceeded";
    0x08 => ConnectionTimeout, "connection timeout";
    0x09 => ConnectionLimitExceeded, "connection limit exceeded";
    0x0c => CommandDisallowed, "command disallowed";
    0x0d => RejectedDueToLimitedResources, "rejected due to limited resources";
    0x0e => RejectedDueToSecurityReasons, "rejected due to security reasons";
    0x11 => UnsupportedFeatureOrParameterValue, "unsupported feature or parameter value";
    0x12 => InvalidHciCommandParameters, "invalid HCI command parameters";
    0x13 => RemoteUserTerminatedConnection, "remote user terminated connection";
    0x16 => ConnectionTerminatedByLocalHost, "connection terminated by local host";
    0x17 => RepeatedAttempts, "repeated attempts";
    0x18 => PairingNotAllowed, "pairing not allowed";
    0x19 => UnknownLmpPdu, "unknown LMP PDU";
    0x1a => UnsupportedRemoteFeature, "unsupported remote feature / unsupported LMP feature";
    0x1e => InvalidLmpParameters, "invalid LMP parameters";
    0x1f => UnspecifiedError, "unspecified error";
    0x20 => UnsupportedLmpParameterValue, "unsupported LMP parameter value";
    0x21 => RoleChangeNotAllowed, "role change not allowed";
    0x22 => LmpResponseTimeout, "LMP response timeout";
    0x23 => LmpErrorTransactionCollision, "LMP error transaction collision";
    0x24 => LmpPduNotAllowed, "LMP PDU not allowed";
    0x25 => EncryptionModeNotAcceptable, "encryption mode not acceptable";
    0x26 => LinkKeyCannotBeChanged, "link key cannot be changed";
    0x27 => RequestedQosNotSupported, "requested QoS not supported";
    0x28 => InstantPassed, "instant passed";
    0x29 => PairingWithUnitKeyNotSupported, "pairing with unit key not supported";
    0x2a => DifferentTransactionCollision, "different transaction collision";
    0x2c => QosUnacceptableParameter, "QoS unacceptable parameter";
    0x2d => QosRejected, "QoS rejected";
    0x2e => ChannelAssessmentNotSupported, "channel assessment not supported";
    0x2f => InsufficientSecurity, "insufficient security";
    0x30 => ParameterOutOfMandatoryRange, "parameter out of mandatory range";
    0x32 => RoleSwitchPending, "role switch pending";
    0x34 => ReservedSlotViolation, "reserved slot violation";
    0x35 => RoleSwitchFailed, "role switch failed";
    0x37 => SimplePairingNotSupportedByHost, "simple pairing not supported by host";
    0x38 => HostBusyPairing, "host busy - pairing";
    0x3a => ControllerBusy, "controller busy";
    0x3d => ConnectionTerminatedDueToMicFailure, "connection terminated due to MIC failure";
    0x40 => CoarseClockAdjustmentRejected, "coarse clock adjustment rejected";
    0x44 => OperationCancelledByHost, "operation cancelled by host";
    0x45 => PacketTooLong, "packet too long";
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.description() {
            Some(text) => write!(f, "{} (0x{:02X})", text, self.into_code()),
            None => write!(f, "unknown error code (0x{:02X})", self.into_code()),
        }
    }
}
