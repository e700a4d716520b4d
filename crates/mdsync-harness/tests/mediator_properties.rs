//! Property tests for the mediator state machine.
//!
//! Random connect, disconnect, begin and commit sequences are checked against
//! a small model of the transaction lock:
//! - At most one device holds the lock, and it is the one the model expects
//! - A begin while another device holds the lock is rejected with the holder
//! - Releasing the lock notifies every other online device
//! - A leader exists exactly when some device is online, and it is online

use std::collections::BTreeMap;

use bytes::Bytes;
use mdsync_core::{CloseCode, Environment, Handshake, HandshakeAction, HandshakeConfig};
use mdsync_crypto::{DeviceGroupKeys, DeviceGroupSecret, device_group_public_key, seal};
use mdsync_harness::{MediatorAction, MediatorConfig, MediatorState, SimEnv};
use mdsync_proto::{
    Frame, Payload, ReflectId,
    payloads::{
        reflect::Reflect,
        transaction::{BeginTransaction, TransactionEnded, TransactionRejected, TransactionScope},
    },
};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Connect(u64),
    Disconnect(u64),
    Begin(u64),
    Commit(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..=3).prop_map(Op::Connect),
        (1u64..=3).prop_map(Op::Disconnect),
        (1u64..=3).prop_map(Op::Begin),
        (1u64..=3).prop_map(Op::Commit),
    ]
}

struct Harness {
    env: SimEnv,
    keys: DeviceGroupKeys,
    mediator: MediatorState<SimEnv>,
    online: BTreeMap<u64, u64>,
    holder: Option<u64>,
}

impl Harness {
    fn new(seed: u64) -> Self {
        let env = SimEnv::new(seed);
        let keys = DeviceGroupKeys::from_secret(&DeviceGroupSecret::new([8; 32]));
        let group_public = device_group_public_key(keys.path());
        let mediator = MediatorState::new(env.fork(), MediatorConfig::default(), group_public);
        Self { env, keys, mediator, online: BTreeMap::new(), holder: None }
    }

    fn send(&mut self, connection: u64, payload: Payload) -> Vec<MediatorAction> {
        let bytes = payload.into_frame().unwrap().to_vec().unwrap();
        self.mediator.receive(connection, Bytes::from(bytes))
    }

    fn connect(&mut self, device_id: u64) {
        let (connection, hello) = self.mediator.connect();
        let [MediatorAction::Send { bytes, .. }] = hello.as_slice() else {
            panic!("expected server hello, got {hello:?}");
        };
        let frame = Frame::decode(bytes).unwrap();
        let mut handshake = Handshake::new(HandshakeConfig::default(), device_id, false);
        let replies = handshake.handle_frame(&self.env, Some(&self.keys), &frame).unwrap();
        let [HandshakeAction::Send(client_hello)] = replies.as_slice() else {
            panic!("expected client hello, got {replies:?}");
        };

        let actions =
            self.mediator.receive(connection, Bytes::from(client_hello.to_vec().unwrap()));
        if let Some(previous) = self.online.insert(device_id, connection) {
            assert!(actions.contains(&MediatorAction::Close {
                connection: previous,
                code: CloseCode::Normal,
            }));
        }
    }

    fn begin(&mut self, device_id: u64) -> Result<(), TestCaseError> {
        let Some(&connection) = self.online.get(&device_id) else {
            return Ok(());
        };
        let scope = seal(
            self.keys.transaction_scope(),
            &self.env.random_nonce(),
            &[TransactionScope::ContactSync.to_u8()],
        );
        let begin = BeginTransaction { encrypted_scope: scope, ttl_secs: None };
        let actions = self.send(connection, Payload::BeginTransaction(begin));
        let replies = payloads_for(&actions, connection);

        match self.holder {
            Some(holder) if holder != device_id => {
                let rejected = matches!(
                    replies.as_slice(),
                    [Payload::TransactionRejected(TransactionRejected { device_id, .. })]
                        if *device_id == holder
                );
                prop_assert!(rejected, "expected rejection by {holder}, got {replies:?}");
            },
            _ => {
                prop_assert!(matches!(replies.as_slice(), [Payload::BeginTransactionAck]));
                self.holder = Some(device_id);
            },
        }
        Ok(())
    }

    fn commit(&mut self, device_id: u64) -> Result<(), TestCaseError> {
        let Some(&connection) = self.online.get(&device_id) else {
            return Ok(());
        };
        let actions = self.send(connection, Payload::CommitTransaction);
        prop_assert!(matches!(
            payloads_for(&actions, connection).as_slice(),
            [Payload::CommitTransactionAck]
        ));

        if self.holder == Some(device_id) {
            self.holder = None;
            self.check_ended(&actions, device_id)?;
        }
        Ok(())
    }

    fn disconnect(&mut self, device_id: u64) -> Result<(), TestCaseError> {
        let Some(connection) = self.online.remove(&device_id) else {
            return Ok(());
        };
        let actions = self.mediator.disconnect(connection);

        if self.holder == Some(device_id) {
            self.holder = None;
            self.check_ended(&actions, device_id)?;
        }
        Ok(())
    }

    fn check_ended(&self, actions: &[MediatorAction], holder: u64) -> Result<(), TestCaseError> {
        for (&other, &connection) in self.online.iter().filter(|(id, _)| **id != holder) {
            let ended = payloads_for(actions, connection).iter().any(|payload| {
                matches!(
                    payload,
                    Payload::TransactionEnded(TransactionEnded { device_id, .. })
                        if *device_id == holder
                )
            });
            prop_assert!(ended, "device {other} not told that {holder} released the lock");
        }
        Ok(())
    }

    fn check_invariants(&self) -> Result<(), TestCaseError> {
        prop_assert_eq!(self.mediator.lock_holder(), self.holder);
        prop_assert_eq!(
            self.mediator.online_devices(),
            self.online.keys().copied().collect::<Vec<_>>()
        );
        match self.mediator.leader() {
            Some(leader) => prop_assert!(self.online.contains_key(&leader)),
            None => prop_assert!(self.online.is_empty()),
        }
        Ok(())
    }
}

fn payloads_for(actions: &[MediatorAction], target: u64) -> Vec<Payload> {
    actions
        .iter()
        .filter_map(|action| match action {
            MediatorAction::Send { connection, bytes } if *connection == target => {
                Some(Payload::from_frame(&Frame::decode(bytes).unwrap()).unwrap())
            },
            _ => None,
        })
        .collect()
}

proptest! {
    #[test]
    fn lock_and_leader_follow_the_model(
        seed: u64,
        ops in prop::collection::vec(op(), 1..60),
    ) {
        let mut harness = Harness::new(seed);
        for op in ops {
            match op {
                Op::Connect(device_id) => harness.connect(device_id),
                Op::Disconnect(device_id) => harness.disconnect(device_id)?,
                Op::Begin(device_id) => harness.begin(device_id)?,
                Op::Commit(device_id) => harness.commit(device_id)?,
            }
            harness.check_invariants()?;
        }
    }

    /// Reflected envelopes stay queued for a device until it acknowledges
    /// them, across any number of reconnects.
    #[test]
    fn reflected_queue_survives_reconnects(reflects in 1usize..8, reconnects in 0usize..4) {
        let mut harness = Harness::new(3);
        harness.connect(1);
        harness.connect(2);

        let sender = harness.online[&1];
        for index in 0..reflects {
            let reflect = Reflect {
                reflect_id: ReflectId::from_u32(u32::try_from(index).unwrap()),
                envelope: Bytes::from(vec![0; 40]),
            };
            harness.send(sender, Payload::Reflect(reflect));
        }
        for _ in 0..reconnects {
            harness.disconnect(2)?;
            harness.connect(2);
        }
        prop_assert_eq!(harness.mediator.queued(2), reflects);
        prop_assert_eq!(harness.mediator.queued(1), 0);
    }
}
