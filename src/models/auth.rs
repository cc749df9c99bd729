use models::UserId;

/// Claims of a bearer token issued by the user service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub user_id: UserId,
    pub exp: i64,
}

/// Who originates a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    /// Authenticated user behind an HTTP request
    User(UserId),
    /// Payment gateway bridge, acting for a user when the movement was requested by one
    Bridge { on_behalf_of: Option<UserId> },
    /// Closing subroutine of the scheduler and of payback
    Closing,
}

impl Initiator {
    /// User recorded as `initiated_by` on ledger records.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Initiator::User(user_id) => Some(*user_id),
            Initiator::Bridge { on_behalf_of } => *on_behalf_of,
            Initiator::Closing => None,
        }
    }
}
