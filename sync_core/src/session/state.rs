//! Session lifecycle levels (spec.md §4.3 Lifecycle levels).
//!
//! Two orthogonal dimensions: transport level (owned by Connection) and
//! application level (owned by `SessionWrapper`). Only the application
//! level has branching transitions; they are modeled explicitly here so an
//! illegal transition is a compile-time-checked `Result`, not a silent no-op.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportLevel {
    Unactivated,
    Active,
    Deactivating,
    Deactivated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationLevel {
    Inactive,
    WaitingForAccessToken,
    Active,
    Dying,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationEvent {
    Revive { token_expired: bool },
    TokenRefreshed,
    Close { immediate: bool },
    UploadCompleted,
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: ApplicationLevel,
    pub event: ApplicationEvent,
}

/// Applies one application-level event per the diagram in spec.md §4.3.
/// `Paused` is sticky: only `Resume` leaves it, regardless of the current
/// sub-state it paused from.
pub fn apply(state: ApplicationLevel, event: ApplicationEvent) -> Result<ApplicationLevel, IllegalTransition> {
    use ApplicationEvent::*;
    use ApplicationLevel::*;

    if state == Paused {
        return match event {
            Resume => Ok(Active),
            _ => Err(IllegalTransition { from: state, event }),
        };
    }
    if let Pause = event {
        return Ok(Paused);
    }

    match (state, event) {
        (Inactive, Revive { token_expired: false }) => Ok(Active),
        (Inactive, Revive { token_expired: true }) => Ok(WaitingForAccessToken),
        (WaitingForAccessToken, TokenRefreshed) => Ok(Active),
        (Active, Close { immediate: true }) => Ok(Inactive),
        (Active, Close { immediate: false }) => Ok(Dying),
        (Dying, UploadCompleted) => Ok(Inactive),
        (Dying, Revive { token_expired: false }) => Ok(Active),
        (Dying, Revive { token_expired: true }) => Ok(WaitingForAccessToken),
        _ => Err(IllegalTransition { from: state, event }),
    }
}
