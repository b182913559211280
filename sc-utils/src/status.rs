//! Status codes reported at the secure-channel layer (OPC UA Part 6 / Part 4 subset).

/// A status code surfaced by the chunk engine, connection FSM or crypto provider.
///
/// Only the subset of the full OPC UA status code table that this layer can itself
/// produce is represented here; service-level codes are the services layer's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StatusCode {
	Good,
	BadTcpMessageTooLarge,
	BadTcpMessageTypeInvalid,
	BadTcpEndpointUrlInvalid,
	BadTcpSecureChannelUnknown,
	BadTcpInternalError,
	BadSecurityChecksFailed,
	BadSecureChannelTokenUnknown,
	BadSecureChannelClosed,
	BadRequestNotAllowed,
	BadProtocolVersionUnsupported,
	BadInvalidArgument,
	BadTimeout,
	BadResponseTooLarge,
	BadCertificateInvalid,
	BadCertificateUntrusted,
	BadOutOfMemory,
}

impl StatusCode {
	/// Whether this code represents success.
	pub fn is_good(self) -> bool {
		matches!(self, StatusCode::Good)
	}

	/// Whether the root cause is a security check, in which case any outgoing ERR/CLO
	/// reason text must be blanked to avoid giving an attacker an oracle.
	pub fn is_security_sensitive(self) -> bool {
		matches!(
			self,
			StatusCode::BadSecurityChecksFailed | StatusCode::BadCertificateInvalid | StatusCode::BadCertificateUntrusted
		)
	}
}

impl core::fmt::Display for StatusCode {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		core::fmt::Debug::fmt(self, f)
	}
}

impl StatusCode {
	/// The 32-bit wire representation carried in an ERR body or an OpenSecureChannel
	/// response's `ServiceResult`, per the OPC UA status code numbering convention (`Good`
	/// codes start `0x0`, `Bad` codes start `0x8`).
	pub fn to_wire(self) -> u32 {
		match self {
			StatusCode::Good => 0x0000_0000,
			StatusCode::BadTcpMessageTooLarge => 0x8026_0000,
			StatusCode::BadTcpMessageTypeInvalid => 0x8027_0000,
			StatusCode::BadTcpEndpointUrlInvalid => 0x8028_0000,
			StatusCode::BadTcpSecureChannelUnknown => 0x8029_0000,
			StatusCode::BadTcpInternalError => 0x802A_0000,
			StatusCode::BadSecurityChecksFailed => 0x8013_0000,
			StatusCode::BadSecureChannelTokenUnknown => 0x8033_0000,
			StatusCode::BadSecureChannelClosed => 0x8034_0000,
			StatusCode::BadRequestNotAllowed => 0x8014_0000,
			StatusCode::BadProtocolVersionUnsupported => 0x8039_0000,
			StatusCode::BadInvalidArgument => 0x8002_0000,
			StatusCode::BadTimeout => 0x800A_0000,
			StatusCode::BadResponseTooLarge => 0x8038_0000,
			StatusCode::BadCertificateInvalid => 0x8010_0000,
			StatusCode::BadCertificateUntrusted => 0x8018_0000,
			StatusCode::BadOutOfMemory => 0x8015_0000,
		}
	}

	pub fn from_wire(value: u32) -> Self {
		match value {
			0x0000_0000 => StatusCode::Good,
			0x8026_0000 => StatusCode::BadTcpMessageTooLarge,
			0x8027_0000 => StatusCode::BadTcpMessageTypeInvalid,
			0x8028_0000 => StatusCode::BadTcpEndpointUrlInvalid,
			0x8029_0000 => StatusCode::BadTcpSecureChannelUnknown,
			0x8013_0000 => StatusCode::BadSecurityChecksFailed,
			0x8033_0000 => StatusCode::BadSecureChannelTokenUnknown,
			0x8034_0000 => StatusCode::BadSecureChannelClosed,
			0x8014_0000 => StatusCode::BadRequestNotAllowed,
			0x8039_0000 => StatusCode::BadProtocolVersionUnsupported,
			0x8002_0000 => StatusCode::BadInvalidArgument,
			0x800A_0000 => StatusCode::BadTimeout,
			0x8038_0000 => StatusCode::BadResponseTooLarge,
			0x8010_0000 => StatusCode::BadCertificateInvalid,
			0x8018_0000 => StatusCode::BadCertificateUntrusted,
			0x8015_0000 => StatusCode::BadOutOfMemory,
			_ => StatusCode::BadTcpInternalError,
		}
	}
}
