/// Domain errors of the mint.
///
/// The `Display` strings double as the wire representation: an RPC handler
/// failing with one of the domain kinds is sent to the caller as
/// `["bad", <string>]` and re-raised on the other side via
/// [`MintError::from_wire`]. `Transport` and `Internal` never cross the
/// boundary; they kill the connection instead.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MintError {
    #[error("token not sane")]
    BadToken,
    #[error("no such token")]
    NoSuchToken,
    #[error("payment not received")]
    Unpaid,
    #[error("duplicate token")]
    DuplicateToken,
    #[error("invalid address")]
    BadAddress,
    #[error("bond not sane")]
    BadBond,
    #[error("invalid bond")]
    InvalidBond,
    #[error("bond already used")]
    BondAlreadyUsed,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

impl MintError {
    /// Whether this kind is passed through the RPC boundary verbatim.
    pub fn is_wire(&self) -> bool {
        !matches!(self, MintError::Transport(_) | MintError::Internal(_))
    }

    /// Re-raise an error received as `["bad", msg]`.
    pub fn from_wire(msg: &str) -> MintError {
        match msg {
            "token not sane" => MintError::BadToken,
            "no such token" => MintError::NoSuchToken,
            "payment not received" => MintError::Unpaid,
            "duplicate token" => MintError::DuplicateToken,
            "invalid address" => MintError::BadAddress,
            "bond not sane" => MintError::BadBond,
            "invalid bond" => MintError::InvalidBond,
            "bond already used" => MintError::BondAlreadyUsed,
            other => MintError::Internal(other.to_owned()),
        }
    }

    pub(crate) fn internal(e: impl std::fmt::Display) -> MintError {
        MintError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_kinds_survive_the_round_trip() {
        let kinds = vec![
            MintError::BadToken,
            MintError::NoSuchToken,
            MintError::Unpaid,
            MintError::DuplicateToken,
            MintError::BadAddress,
            MintError::BadBond,
            MintError::InvalidBond,
            MintError::BondAlreadyUsed,
        ];

        for kind in kinds {
            assert!(kind.is_wire());
            assert_eq!(MintError::from_wire(&kind.to_string()), kind);
        }
    }

    #[test]
    fn unknown_wire_string_becomes_internal() {
        assert_eq!(
            MintError::from_wire("the dog ate it"),
            MintError::Internal("the dog ate it".to_owned())
        );
    }
}
