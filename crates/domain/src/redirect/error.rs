use thiserror::Error;

/// Reasons a redirect record is rejected during validation. A rejected
/// record is dropped; the rest of the policy still compiles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedirectError {
    #[error("is disabled")]
    Disabled,

    #[error("must not have an inverted source")]
    InvertedSource,

    #[error("refers to unknown zone '{name}'")]
    UnknownZone { name: String },

    #[error("refers to an ipset but ipset support is disabled")]
    IpsetsDisabled,

    #[error("refers to unknown ipset '{name}'")]
    UnknownIpset { name: String },

    #[error("refers to unknown conntrack helper '{name}'")]
    UnknownHelper { name: String },

    #[error("{field} has a different family than the redirect")]
    FamilyMismatch { field: &'static str },

    #[error("must not have a wildcard source for DNAT target")]
    WildcardSource,

    #[error("has no source specified")]
    MissingSource,

    #[error("must not use a negated helper match")]
    NegatedHelper,

    #[error("must not have a wildcard destination for SNAT target")]
    WildcardDest,

    #[error("has no destination specified")]
    MissingDest,

    #[error("has no rewrite source address for SNAT target")]
    MissingSnatAddr,

    #[error("must not use source MAC matches for SNAT target")]
    MacWithSnat,

    #[error("must not use a conntrack helper for SNAT target")]
    HelperWithSnat,
}
