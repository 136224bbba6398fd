use std::fmt;

/// WebSocket close codes the transport distinguishes.
///
/// Only [`CloseCode::Normal`] is a clean close. Everything else, including
/// codes this enum does not name, counts as a hard failure for reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001
    GoingAway,
    /// 1006, also used when the stream ends without a close frame.
    Abnormal,
    /// 1011
    ServerError,
    /// 1015
    TlsHandshake,
    Other(u16),
}

impl CloseCode {
    pub fn is_normal(self) -> bool {
        matches!(self, Self::Normal)
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::Abnormal => 1006,
            Self::ServerError => 1011,
            Self::TlsHandshake => 1015,
            Self::Other(code) => code,
        }
    }

    /// Diagnostic line logged when the socket closes with this code.
    pub fn diagnostic(self) -> &'static str {
        match self {
            Self::Normal => "closed normally",
            Self::GoingAway => "server going away or client navigating away",
            Self::Abnormal => "closed abnormally without a close frame (network drop or server crash)",
            Self::ServerError => "server hit an internal error",
            Self::TlsHandshake => "TLS handshake failed; check the certificate of the backend",
            Self::Other(_) => "closed with an unrecognised code",
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1006 => Self::Abnormal,
            1011 => Self::ServerError,
            1015 => Self::TlsHandshake,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}
