//! State synchronization records carried inside envelopes.
//!
//! Update records use `Option` fields: `None` means "unchanged", so a record
//! only carries what actually changed since the last sync. Create records
//! must carry the mandatory fields of the entity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reference to an encrypted blob stored on the blob server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blob {
    /// Blob id on the server
    pub id: [u8; 16],
    /// Nonce used to encrypt the blob, `None` for the well-known default
    pub nonce: Option<[u8; 24]>,
    /// Symmetric key the blob is encrypted with
    pub key: [u8; 32],
    /// Upload time (ms since the Unix epoch)
    pub uploaded_at: Option<u64>,
}

/// Change of a picture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaImage {
    /// Picture was removed
    Removed,
    /// Picture was replaced by the referenced blob
    Updated(Blob),
}

/// Verification level of a contact's public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationLevel {
    /// Key not verified
    Unverified,
    /// Key matched via directory lookup
    ServerVerified,
    /// Key verified in person
    FullyVerified,
}

/// Kind of identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityType {
    /// Consumer identity
    Regular,
    /// Business identity
    Work,
}

/// How the user knows a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquaintanceLevel {
    /// Explicitly added
    Direct,
    /// Only known through a shared group
    Group,
}

/// Directory state of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityState {
    /// Identity in use
    Active,
    /// Identity not seen for a while
    Inactive,
    /// Identity revoked
    Invalid,
}

/// Where a contact's name comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactSyncState {
    /// Set by the identity itself
    Initial,
    /// Imported from the address book
    Imported,
    /// Edited by the user
    Custom,
}

/// Conversation protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationCategory {
    /// Regular conversation
    Default,
    /// Hidden behind a passcode
    Protected,
}

/// Conversation placement in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationVisibility {
    /// Listed normally
    Normal,
    /// Archived
    Archived,
    /// Pinned to the top
    Pinned,
}

/// Contact record. All fields but the identity are optional (`None` means
/// unchanged).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Identity string
    pub identity: String,
    /// Public key, mandatory on create
    pub public_key: Option<[u8; 32]>,
    /// Creation time (ms)
    pub created_at: Option<u64>,
    /// First name
    pub first_name: Option<String>,
    /// Last name
    pub last_name: Option<String>,
    /// Nickname chosen by the contact
    pub nickname: Option<String>,
    /// Key verification level
    pub verification_level: Option<VerificationLevel>,
    /// Identity kind
    pub identity_type: Option<IdentityType>,
    /// Acquaintance level
    pub acquaintance_level: Option<AcquaintanceLevel>,
    /// Directory state
    pub activity_state: Option<ActivityState>,
    /// Name origin
    pub sync_state: Option<ContactSyncState>,
    /// Conversation protection
    pub conversation_category: Option<ConversationCategory>,
    /// Conversation placement
    pub conversation_visibility: Option<ConversationVisibility>,
    /// Picture set by the user for this contact
    pub user_defined_profile_picture: Option<DeltaImage>,
    /// Picture published by the contact
    pub contact_defined_profile_picture: Option<DeltaImage>,
}

impl Contact {
    /// Record with only the identity set.
    pub fn new(identity: impl Into<String>) -> Self {
        Self { identity: identity.into(), ..Self::default() }
    }
}

/// Contact sync action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactSync {
    /// Contact created on another device
    Create(Contact),
    /// Contact changed on another device
    Update(Contact),
    /// Contact deleted on another device
    Delete {
        /// Deleted identity
        identity: String,
    },
}

impl ContactSync {
    /// Identity the action applies to.
    pub fn identity(&self) -> &str {
        match self {
            Self::Create(contact) | Self::Update(contact) => &contact.identity,
            Self::Delete { identity } => identity,
        }
    }
}

/// Unique group identifier: creator plus creator-chosen id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupIdentity {
    /// Group id chosen by the creator
    pub group_id: u64,
    /// Identity of the creator
    pub creator_identity: String,
}

impl std::fmt::Display for GroupIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{:016x}", self.creator_identity, self.group_id)
    }
}

/// The user's membership in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupUserState {
    /// Active member
    Member,
    /// Removed by the creator
    Kicked,
    /// Left voluntarily
    Left,
}

/// Group record. `None` fields are unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group identity
    pub group_identity: GroupIdentity,
    /// Group name
    pub name: Option<String>,
    /// Creation time (ms)
    pub created_at: Option<u64>,
    /// The user's membership
    pub user_state: Option<GroupUserState>,
    /// Members other than the user
    pub member_identities: Option<Vec<String>>,
    /// Group picture
    pub profile_picture: Option<DeltaImage>,
    /// Conversation protection
    pub conversation_category: Option<ConversationCategory>,
    /// Conversation placement
    pub conversation_visibility: Option<ConversationVisibility>,
}

impl Group {
    /// Record with only the identity set.
    pub fn new(group_identity: GroupIdentity) -> Self {
        Self {
            group_identity,
            name: None,
            created_at: None,
            user_state: None,
            member_identities: None,
            profile_picture: None,
            conversation_category: None,
            conversation_visibility: None,
        }
    }
}

/// Group sync action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupSync {
    /// Group created on another device
    Create(Group),
    /// Group changed on another device
    Update(Group),
    /// Group deleted on another device
    Delete {
        /// Deleted group
        group_identity: GroupIdentity,
    },
}

impl GroupSync {
    /// Group the action applies to.
    pub fn group_identity(&self) -> &GroupIdentity {
        match self {
            Self::Create(group) | Self::Update(group) => &group.group_identity,
            Self::Delete { group_identity } => group_identity,
        }
    }
}

/// Distribution list record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionList {
    /// List id
    pub distribution_list_id: u64,
    /// List name
    pub name: Option<String>,
    /// Creation time (ms)
    pub created_at: Option<u64>,
    /// Recipients
    pub member_identities: Option<Vec<String>>,
    /// Conversation protection
    pub conversation_category: Option<ConversationCategory>,
    /// Conversation placement
    pub conversation_visibility: Option<ConversationVisibility>,
}

/// Distribution list sync action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionListSync {
    /// List created
    Create(DistributionList),
    /// List changed
    Update(DistributionList),
    /// List deleted
    Delete {
        /// Deleted list
        distribution_list_id: u64,
    },
}

/// Who may receive the user's profile picture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharePolicy {
    /// Nobody
    Nobody,
    /// Every contact
    Everyone,
    /// Only the listed identities
    AllowList(Vec<String>),
}

/// The user's own profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Nickname
    pub nickname: Option<String>,
    /// Profile picture
    pub profile_picture: Option<DeltaImage>,
    /// Picture distribution policy
    pub profile_picture_share_with: Option<SharePolicy>,
}

/// User profile sync action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserProfileSync {
    /// Profile changed
    Update(UserProfile),
}

/// Contact synchronization with the address book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactSyncPolicy {
    /// Address book not synced
    NotSynced,
    /// Address book synced
    Sync,
}

/// Handling of messages from unknown identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnknownContactPolicy {
    /// Accept
    AllowUnknown,
    /// Drop
    BlockUnknown,
}

/// Read receipt and typing indicator policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendPolicy {
    /// Send to contacts
    Send,
    /// Never send
    DontSend,
}

/// Generic allow/deny policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllowPolicy {
    /// Allowed
    Allow,
    /// Denied
    Deny,
}

/// Application settings shared between devices. `None` fields are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Address book sync
    pub contact_sync_policy: Option<ContactSyncPolicy>,
    /// Unknown contact handling
    pub unknown_contact_policy: Option<UnknownContactPolicy>,
    /// Read receipts
    pub read_receipt_policy: Option<SendPolicy>,
    /// Typing indicators
    pub typing_indicator_policy: Option<SendPolicy>,
    /// One-to-one calls
    pub call_policy: Option<AllowPolicy>,
    /// Screenshots
    pub screenshot_policy: Option<AllowPolicy>,
    /// Blocked identities
    pub blocked_identities: Option<Vec<String>>,
    /// Identities excluded from address book sync
    pub excluded_from_sync_identities: Option<Vec<String>>,
}

/// Settings sync action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsSync {
    /// Settings changed
    Update(Settings),
}

/// Value of a managed-device parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MdmValue {
    /// String value
    Text(String),
    /// Boolean value
    Flag(bool),
    /// Integer value
    Integer(u64),
}

/// Managed-device parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdmParameters {
    /// Parameter values by name
    pub parameters: BTreeMap<String, MdmValue>,
}

/// MDM parameter sync action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MdmParameterSync {
    /// Parameters changed
    Update(MdmParameters),
}
