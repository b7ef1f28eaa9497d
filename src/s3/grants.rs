//! Order-independent comparison of object ACLs.
//!
//! Servers return grants in whatever order they store them, so both sides
//! are sorted by grantee identity and permission before being compared
//! pairwise.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Group URI granting access to everyone.
pub const ALL_USERS: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
/// Group URI granting access to any authenticated AWS account.
pub const AUTHENTICATED_USERS: &str = "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

/// S3 ACL permissions, ordered by the priority used for canonical sorting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Permission {
    FullControl,
    Read,
    ReadAcp,
    Write,
    WriteAcp,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Permission::FullControl => "FULL_CONTROL",
            Permission::Read => "READ",
            Permission::ReadAcp => "READ_ACP",
            Permission::Write => "WRITE",
            Permission::WriteAcp => "WRITE_ACP",
        })
    }
}

/// The subject of a grant. Exactly one of `id`, `uri` or `email` is
/// normally set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grantee {
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub uri: Option<String>,
    pub email: Option<String>,
}

impl Grantee {
    pub fn canonical_user(id: impl Into<String>, display_name: Option<&str>) -> Self {
        Self {
            id: Some(id.into()),
            display_name: display_name.map(str::to_owned),
            ..Default::default()
        }
    }

    pub fn group(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Default::default()
        }
    }

    pub fn email(address: impl Into<String>) -> Self {
        Self {
            email: Some(address.into()),
            ..Default::default()
        }
    }

    /// Canonical identity: id, falling back to URI, then email.
    pub fn identity(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.uri.as_deref())
            .or(self.email.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub grantee: Grantee,
    pub permission: Permission,
}

impl Grant {
    pub fn new(grantee: Grantee, permission: Permission) -> Self {
        Self {
            grantee,
            permission,
        }
    }

    fn sort_key(&self) -> Option<(&str, Permission)> {
        self.grantee.identity().map(|id| (id, self.permission))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub display_name: Option<String>,
}

/// An object's owner and grant set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlList {
    pub owner: Option<Owner>,
    pub grants: Vec<Grant>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrantError {
    #[error("Expected {expected} grants, found {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("Grant set contains more than one {permission} grant for {identity}")]
    DuplicateGrant {
        identity: String,
        permission: Permission,
    },
    #[error("Grant for {permission} has no grantee id, uri or email")]
    MissingIdentity { permission: Permission },
    #[error("Grant {index} differs: expected {expected:?}, found {actual:?}")]
    Mismatch {
        index: usize,
        expected: Box<Grant>,
        actual: Box<Grant>,
    },
    #[error("Expected owner {expected:?}, found {actual:?}")]
    OwnerMismatch {
        expected: Option<String>,
        actual: Option<String>,
    },
}

/// Sorts grants by `(identity, permission)`, rejecting duplicate keys.
pub fn canonicalize(grants: &[Grant]) -> Result<Vec<&Grant>, GrantError> {
    let mut keyed = grants
        .iter()
        .map(|grant| {
            grant
                .sort_key()
                .map(|key| (key, grant))
                .ok_or(GrantError::MissingIdentity {
                    permission: grant.permission,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    keyed.sort_by(|(a, _), (b, _)| a.cmp(b));

    if let Some(pair) = keyed.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        let (identity, permission) = pair[0].0;
        return Err(GrantError::DuplicateGrant {
            identity: identity.to_owned(),
            permission,
        });
    }
    Ok(keyed.into_iter().map(|(_, grant)| grant).collect())
}

/// Compares two grant sets regardless of order.
///
/// Every grantee field takes part in the comparison, display name included.
pub fn compare_grants(expected: &[Grant], actual: &[Grant]) -> Result<(), GrantError> {
    if expected.len() != actual.len() {
        return Err(GrantError::CountMismatch {
            expected: expected.len(),
            actual: actual.len(),
        });
    }
    let expected = canonicalize(expected)?;
    let actual = canonicalize(actual)?;

    match expected
        .iter()
        .zip(actual.iter())
        .position(|(e, a)| e != a)
    {
        Some(index) => Err(GrantError::Mismatch {
            index,
            expected: Box::new(expected[index].clone()),
            actual: Box::new(actual[index].clone()),
        }),
        None => Ok(()),
    }
}

/// [compare_grants] plus an owner id check.
pub fn compare_acl(
    expected: &AccessControlList,
    actual: &AccessControlList,
) -> Result<(), GrantError> {
    let expected_owner = expected.owner.as_ref().map(|o| o.id.clone());
    let actual_owner = actual.owner.as_ref().map(|o| o.id.clone());
    if expected_owner != actual_owner {
        return Err(GrantError::OwnerMismatch {
            expected: expected_owner,
            actual: actual_owner,
        });
    }
    compare_grants(&expected.grants, &actual.grants)
}

#[cfg(any(test, feature = "test-utils"))]
pub mod arbitrary {
    use proptest::prelude::*;

    use super::{Grant, Grantee, Permission, ALL_USERS, AUTHENTICATED_USERS};

    impl Arbitrary for Permission {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            prop_oneof![
                Just(Permission::FullControl),
                Just(Permission::Read),
                Just(Permission::ReadAcp),
                Just(Permission::Write),
                Just(Permission::WriteAcp),
            ]
            .boxed()
        }
    }

    impl Arbitrary for Grantee {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            prop_oneof![
                ("[a-f0-9]{8}", proptest::option::of("[a-z]{3,8}"))
                    .prop_map(|(id, name)| Grantee::canonical_user(id, name.as_deref())),
                prop_oneof![Just(ALL_USERS), Just(AUTHENTICATED_USERS)].prop_map(Grantee::group),
                "[a-z]{3,8}@example\\.com".prop_map(Grantee::email),
            ]
            .boxed()
        }
    }

    impl Arbitrary for Grant {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            (any::<Grantee>(), any::<Permission>())
                .prop_map(|(grantee, permission)| Grant::new(grantee, permission))
                .boxed()
        }
    }
}
