//! Connection state machine vocabulary.

use chainwatch_core::transport::HealthStatus;

/// Which endpoint a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    Primary,
    Backup,
}

impl std::fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Backup => write!(f, "backup"),
        }
    }
}

/// State of the single logically-active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempted yet.
    Idle,
    /// Opening the primary endpoint.
    ConnectingPrimary,
    /// Primary connection established.
    OpenPrimary,
    /// Primary failed or was lost; opening the backup endpoint.
    ConnectingBackup,
    /// Backup connection established.
    OpenBackup,
    /// Torn down, or both endpoints failed. Only `connect()` leaves this state.
    Closed,
}

impl ConnectionState {
    /// `Idle` or `Closed`: no connection is open or being opened.
    pub fn is_offline(self) -> bool {
        matches!(self, Self::Idle | Self::Closed)
    }

    /// Role of the open connection, if any.
    pub fn open_role(self) -> Option<EndpointRole> {
        match self {
            Self::OpenPrimary => Some(EndpointRole::Primary),
            Self::OpenBackup => Some(EndpointRole::Backup),
            _ => None,
        }
    }

    pub fn health(self) -> HealthStatus {
        match self {
            Self::OpenPrimary => HealthStatus::Healthy,
            Self::OpenBackup => HealthStatus::Degraded,
            Self::ConnectingPrimary | Self::ConnectingBackup | Self::Closed => {
                HealthStatus::Unhealthy
            }
            Self::Idle => HealthStatus::Unknown,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ConnectingPrimary => write!(f, "connecting-primary"),
            Self::OpenPrimary => write!(f, "open-primary"),
            Self::ConnectingBackup => write!(f, "connecting-backup"),
            Self::OpenBackup => write!(f, "open-backup"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
