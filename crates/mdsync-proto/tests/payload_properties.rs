//! Property-based tests for payload and envelope encoding.

use bytes::Bytes;
use mdsync_proto::{
    ConversationId, Envelope, EnvelopeContent, Frame, GroupIdentity, InboundFrame, MessageId,
    MessageKind, Payload, ReflectId, is_mediator_frame,
    messages::{
        IncomingMessage, IncomingMessageRead, IncomingMessageUpdate, OutgoingMessage,
        OutgoingMessageSent, OutgoingMessageUpdate,
    },
    payloads::{
        handshake::{
            ClientHello, DeviceSlotExpirationPolicy, DeviceSlotState, DeviceSlotsExhaustedPolicy,
            ServerHello, ServerInfo,
        },
        reflect::{Reflect, Reflected},
        transaction::{BeginTransaction, TransactionEnded, TransactionRejected},
    },
    sync::{
        Blob, Contact, ContactSync, DeltaImage, DistributionList, DistributionListSync, Group,
        GroupSync, MdmParameterSync, MdmParameters, MdmValue, Settings, SettingsSync, UserProfile,
        UserProfileSync, VerificationLevel,
    },
};
use proptest::prelude::*;

fn identity() -> impl Strategy<Value = String> {
    "[A-Z0-9]{8}"
}

fn group_identity() -> impl Strategy<Value = GroupIdentity> {
    (any::<u64>(), identity())
        .prop_map(|(group_id, creator_identity)| GroupIdentity { group_id, creator_identity })
}

fn blob() -> impl Strategy<Value = Blob> {
    (any::<[u8; 16]>(), any::<[u8; 32]>(), proptest::option::of(any::<u64>())).prop_map(
        |(id, key, uploaded_at)| Blob { id, nonce: None, key, uploaded_at },
    )
}

fn delta_image() -> impl Strategy<Value = DeltaImage> {
    prop_oneof![Just(DeltaImage::Removed), blob().prop_map(DeltaImage::Updated)]
}

fn conversation() -> impl Strategy<Value = ConversationId> {
    prop_oneof![
        identity().prop_map(ConversationId::Contact),
        any::<u64>().prop_map(ConversationId::DistributionList),
        group_identity().prop_map(ConversationId::Group),
    ]
}

fn contact() -> impl Strategy<Value = Contact> {
    (
        identity(),
        proptest::option::of(any::<[u8; 32]>()),
        proptest::option::of("[a-z]{1,12}"),
        proptest::option::of(delta_image()),
    )
        .prop_map(|(identity, public_key, first_name, picture)| Contact {
            public_key,
            first_name,
            verification_level: Some(VerificationLevel::ServerVerified),
            contact_defined_profile_picture: picture,
            ..Contact::new(identity)
        })
}

fn envelope_content() -> impl Strategy<Value = EnvelopeContent> {
    prop_oneof![sync_content(), message_content()]
}

fn sync_content() -> impl Strategy<Value = EnvelopeContent> {
    prop_oneof![
        contact().prop_map(|c| EnvelopeContent::ContactSync(ContactSync::Update(c))),
        identity().prop_map(|identity| EnvelopeContent::ContactSync(ContactSync::Delete {
            identity
        })),
        (group_identity(), proptest::option::of(prop::collection::vec(identity(), 0..5))).prop_map(
            |(gid, members)| {
                let mut group = Group::new(gid);
                group.member_identities = members;
                EnvelopeContent::GroupSync(GroupSync::Create(group))
            }
        ),
        any::<u64>().prop_map(|id| {
            EnvelopeContent::DistributionListSync(DistributionListSync::Create(DistributionList {
                distribution_list_id: id,
                name: Some("list".into()),
                created_at: None,
                member_identities: None,
                conversation_category: None,
                conversation_visibility: None,
            }))
        }),
        proptest::option::of(delta_image()).prop_map(|picture| {
            EnvelopeContent::UserProfileSync(UserProfileSync::Update(UserProfile {
                nickname: Some("me".into()),
                profile_picture: picture,
                profile_picture_share_with: None,
            }))
        }),
        prop::collection::vec(identity(), 0..4).prop_map(|blocked| {
            EnvelopeContent::SettingsSync(SettingsSync::Update(Settings {
                blocked_identities: Some(blocked),
                ..Settings::default()
            }))
        }),
        any::<bool>().prop_map(|flag| {
            let mut parameters = MdmParameters::default();
            parameters.parameters.insert("th_disable_save_to_gallery".into(), MdmValue::Flag(flag));
            EnvelopeContent::MdmParameterSync(MdmParameterSync::Update(parameters))
        }),
    ]
}

fn message_content() -> impl Strategy<Value = EnvelopeContent> {
    prop_oneof![
        (identity(), any::<u64>(), prop::collection::vec(any::<u8>(), 0..64), any::<[u8; 24]>())
            .prop_map(|(sender, id, body, nonce)| {
                EnvelopeContent::IncomingMessage(IncomingMessage {
                    sender_identity: sender,
                    message_id: MessageId(id),
                    created_at: 1,
                    kind: MessageKind::Text,
                    body,
                    nonce,
                })
            }),
        (conversation(), any::<u64>(), any::<u64>()).prop_map(|(conversation, id, at)| {
            EnvelopeContent::IncomingMessageUpdate(IncomingMessageUpdate {
                updates: vec![IncomingMessageRead {
                    conversation,
                    message_id: MessageId(id),
                    read_at: at,
                }],
            })
        }),
        (conversation(), any::<u64>(), prop::collection::vec(any::<[u8; 24]>(), 0..3)).prop_map(
            |(conversation, id, nonces)| {
                EnvelopeContent::OutgoingMessage(OutgoingMessage {
                    conversation,
                    message_id: MessageId(id),
                    thread_message_id: None,
                    created_at: 7,
                    kind: MessageKind::File,
                    body: vec![1, 2, 3],
                    nonces,
                })
            }
        ),
        (conversation(), any::<u64>()).prop_map(|(conversation, id)| {
            EnvelopeContent::OutgoingMessageUpdate(OutgoingMessageUpdate {
                updates: vec![OutgoingMessageSent { conversation, message_id: MessageId(id) }],
            })
        }),
    ]
}

fn control_payload() -> impl Strategy<Value = Payload> {
    prop_oneof![handshake_and_transaction_payload(), reflect_and_empty_payload()]
}

fn handshake_and_transaction_payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        (any::<u32>(), any::<[u8; 32]>(), prop::collection::vec(any::<u8>(), 0..64)).prop_map(
            |(version, esk, challenge)| Payload::ServerHello(ServerHello {
                version,
                esk,
                challenge
            })
        ),
        (any::<u32>(), any::<u64>(), prop::collection::vec(any::<u8>(), 0..80)).prop_map(
            |(version, device_id, response)| Payload::ClientHello(ClientHello {
                version,
                response,
                device_id,
                device_slot_expiration_policy: DeviceSlotExpirationPolicy::Persistent,
                device_slots_exhausted_policy: DeviceSlotsExhaustedPolicy::DropLeastRecent,
                expected_device_slot_state: DeviceSlotState::Existing,
                encrypted_device_info: vec![9; 40],
            })
        ),
        (any::<u64>(), any::<u32>()).prop_map(|(now, slots)| Payload::ServerInfo(ServerInfo {
            current_time_ms: now,
            max_device_slots: slots,
            device_slot_state: DeviceSlotState::New,
            encrypted_shared_device_data: Vec::new(),
        })),
        prop::collection::vec(any::<u8>(), 0..48).prop_map(|scope| {
            Payload::BeginTransaction(BeginTransaction { encrypted_scope: scope, ttl_secs: None })
        }),
        (any::<u64>(), prop::collection::vec(any::<u8>(), 0..48)).prop_map(|(id, scope)| {
            Payload::TransactionRejected(TransactionRejected { device_id: id, encrypted_scope: scope })
        }),
        (any::<u64>(), prop::collection::vec(any::<u8>(), 0..48)).prop_map(|(id, scope)| {
            Payload::TransactionEnded(TransactionEnded { device_id: id, encrypted_scope: scope })
        }),
    ]
}

fn reflect_and_empty_payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        (any::<[u8; 4]>(), prop::collection::vec(any::<u8>(), 0..256)).prop_map(|(id, env)| {
            Payload::Reflect(Reflect { reflect_id: ReflectId(id), envelope: Bytes::from(env) })
        }),
        (any::<[u8; 4]>(), any::<u64>(), prop::collection::vec(any::<u8>(), 0..256)).prop_map(
            |(id, ts, env)| Payload::Reflected(Reflected {
                reflect_id: ReflectId(id),
                flags: 0,
                timestamp_ms: ts,
                envelope: Bytes::from(env),
            })
        ),
        Just(Payload::BeginTransactionAck),
        Just(Payload::CommitTransaction),
        Just(Payload::CommitTransactionAck),
        Just(Payload::RolePromotedToLeader),
        Just(Payload::GetDevicesInfo),
    ]
}

#[test]
fn prop_payload_frame_roundtrip() {
    proptest!(|(payload in control_payload())| {
        let bytes = payload.clone().into_frame().unwrap().to_vec().unwrap();

        // PROPERTY: every encoded payload is recognized as a mediator frame
        prop_assert!(is_mediator_frame(&bytes));

        let frame = Frame::decode(&bytes).unwrap();
        prop_assert_eq!(Payload::from_frame(&frame).unwrap(), payload);
    });
}

#[test]
fn prop_envelope_roundtrip() {
    proptest!(|(
        content in envelope_content(),
        device_id in any::<u64>(),
        padding in prop::collection::vec(any::<u8>(), 0..=Envelope::MAX_PADDING),
    )| {
        let envelope = Envelope { padding, device_id, content };
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded, envelope);
    });
}

#[test]
fn prop_classify_never_fails_on_small_input() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..32))| {
        let classified = InboundFrame::classify(Bytes::from(bytes.clone())).unwrap();
        match classified {
            InboundFrame::Mediator(_) => prop_assert!(is_mediator_frame(&bytes)),
            InboundFrame::Chat(chat) => {
                prop_assert!(!is_mediator_frame(&bytes));
                prop_assert_eq!(chat.as_ref(), bytes.as_slice());
            },
        }
    });
}

#[test]
fn prop_payload_decoding_is_total() {
    // Arbitrary bodies either decode or fail cleanly for every type
    proptest!(|(type_byte in 1u8..=0xff, body in prop::collection::vec(any::<u8>(), 0..64))| {
        let mut bytes = vec![type_byte, 0, 0, 0];
        bytes.extend_from_slice(&body);
        let frame = Frame::decode(&bytes).unwrap();
        let _ = Payload::from_frame(&frame);
    });
}
