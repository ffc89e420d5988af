//! Caller-supplied session logic.

use async_trait::async_trait;

use crate::actions::Flow;
use crate::error::FleetError;
use crate::profile::Profile;

use super::Session;

/// The single capability the scheduler asks of caller logic: drive one
/// launched session for one profile.
///
/// Return `Flow::Continue` for a normal finish, `Flow::Halt` for an
/// intentional early stop (usually via [`Session::snapshot`]), or `Err`
/// for a real failure. The session is torn down in every case.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn invoke(&self, session: &mut Session, profile: &Profile) -> Result<Flow, FleetError>;
}
