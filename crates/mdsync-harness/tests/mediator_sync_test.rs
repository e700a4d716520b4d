//! End-to-end tests: devices and the simulated mediator over turmoil TCP.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use mdsync_client::{
    ContactDeltaAccumulator, LinkConfig, LinkError, LinkEvent, MediatorLink, SyncError, outbound,
};
use mdsync_core::{CloseCode, HandshakeConfig, TransactionError};
use mdsync_crypto::{DeviceGroupKeys, DeviceGroupSecret, device_group_public_key, open};
use mdsync_harness::{
    BlobServer, MediatorConfig, MemoryStore, ScenarioConfig, SimDevice, SimEnv, SimMediator,
    MEDIATOR_BIND_ADDR, run_scenario, scenario_contact, wait_until,
};
use mdsync_proto::{
    MessageContent, MessageId, MessageKind,
    content::Text,
    messages::IncomingMessage,
    payloads::{handshake::DeviceSlotState, transaction::TransactionScope},
    sync::Contact,
};

const DEADLINE: Duration = Duration::from_secs(30);

struct Group {
    secret: DeviceGroupSecret,
    mediator: SimMediator<SimEnv>,
    blobs: BlobServer,
}

impl Group {
    fn new(config: MediatorConfig) -> Self {
        let secret = DeviceGroupSecret::new([5; 32]);
        let public = device_group_public_key(DeviceGroupKeys::from_secret(&secret).path());
        let mediator = SimMediator::new(SimEnv::new(1), config, public);
        Self { secret, mediator, blobs: BlobServer::new() }
    }

    fn serve(&self, sim: &mut turmoil::Sim<'_>) {
        let mediator = self.mediator.clone();
        sim.host("mediator", move || {
            let mediator = mediator.clone();
            async move {
                mediator.bind_and_serve(MEDIATOR_BIND_ADDR).await?;
                Ok(())
            }
        });
    }

    async fn device(
        &self,
        device_id: u64,
        store: &Arc<MemoryStore>,
    ) -> turmoil::Result<SimDevice> {
        SimDevice::connect_established(
            SimEnv::new(100 + device_id),
            device_id,
            &self.secret,
            Arc::clone(store),
            &self.blobs,
            link_config(device_id),
        )
        .await
    }
}

fn link_config(device_id: u64) -> LinkConfig {
    LinkConfig {
        handshake: HandshakeConfig {
            device_label: format!("device-{device_id}"),
            ..HandshakeConfig::default()
        },
        ..LinkConfig::default()
    }
}

fn simulation<'a>() -> turmoil::Sim<'a> {
    turmoil::Builder::new().simulation_duration(Duration::from_secs(120)).rng_seed(11).build()
}

fn contact(identity: &str) -> Contact {
    let mut contact = Contact::new(identity);
    contact.public_key = Some([9; 32]);
    contact
}

#[test]
fn handshake_establishes_and_reports_slots() {
    let mut sim = simulation();
    let group = Group::new(MediatorConfig::default());
    group.serve(&mut sim);

    let store = Arc::new(MemoryStore::new());
    let observed = Arc::clone(&store);
    sim.client("device-1", async move {
        let mut device = group.device(1, &store).await?;

        assert!(matches!(
            device.next_event().await,
            Some(LinkEvent::Established {
                max_device_slots: 4,
                device_slot_state: DeviceSlotState::New,
                version: 1,
            })
        ));
        assert!(matches!(device.next_event().await, Some(LinkEvent::ReflectionQueueDry)));
        assert!(matches!(device.next_event().await, Some(LinkEvent::RolePromotedToLeader)));
        assert!(device.handle.is_established());

        device.shutdown().await
    });

    sim.run().unwrap();
    assert_eq!(observed.max_device_slots(), Some(4));
    assert_eq!(observed.queue_dry_count(), 1);
}

#[test]
fn old_mediator_version_closes_with_4115() {
    let mut sim = simulation();
    let group = Group::new(MediatorConfig { protocol_version: 0, ..MediatorConfig::default() });
    group.serve(&mut sim);

    sim.client("device-1", async move {
        let mut config = link_config(1);
        config.handshake.min_protocol_version = 1;
        let store = Arc::new(MemoryStore::new());
        let device =
            SimDevice::connect(SimEnv::new(3), 1, &group.secret, store, &group.blobs, config)
                .await?;

        let ended = device.join().await?;
        let Err(LinkError::Closed { code }) = ended else {
            panic!("expected close, got {ended:?}");
        };
        assert_eq!(code, CloseCode::UnsupportedProtocolVersion);
        assert_eq!(code.code(), 4115);
        Ok(())
    });

    sim.run().unwrap();
}

#[test]
fn contact_sync_converges_across_three_devices() {
    let config =
        ScenarioConfig { devices: 3, contacts: 250, seed: 42, ..ScenarioConfig::default() };
    let report = run_scenario(&config).unwrap();

    assert!(report.converged());
    assert_eq!(report.undelivered, 0);
    insta::assert_snapshot!(report.to_string().trim_end(), @r"
    contacts=250 converged=true undelivered=0
    device 1: contacts=250 queue_dry=1
    device 2: contacts=250 queue_dry=1
    device 3: contacts=250 queue_dry=1
    ");
}

#[test]
fn same_seed_same_report() {
    let config = ScenarioConfig { devices: 2, contacts: 20, seed: 9, ..ScenarioConfig::default() };
    assert_eq!(run_scenario(&config).unwrap(), run_scenario(&config).unwrap());
}

#[test]
fn concurrent_begin_is_rejected_until_commit() {
    let mut sim = simulation();
    let group = Group::new(MediatorConfig::default());
    group.serve(&mut sim);

    sim.client("devices", async move {
        let first = group.device(1, &Arc::new(MemoryStore::new())).await?;
        let mut second = group.device(2, &Arc::new(MemoryStore::new())).await?;

        first.handle.begin_transaction(TransactionScope::ContactSync).await?;
        let rejected = second.handle.begin_transaction(TransactionScope::GroupSync).await;
        assert!(matches!(
            rejected,
            Err(SyncError::Transaction(TransactionError::Rejected {
                scope: 0x01,
                same_scope: false
            }))
        ));
        assert_eq!(group.mediator.inspect(|state| state.lock_holder()), Some(1));

        first.handle.commit_transaction().await?;
        loop {
            match second.next_event().await {
                Some(LinkEvent::TransactionEnded { device_id, scope }) => {
                    assert_eq!((device_id, scope), (1, 0x01));
                    break;
                },
                Some(_) => {},
                None => panic!("link ended before the transaction did"),
            }
        }

        second.handle.begin_transaction(TransactionScope::GroupSync).await?;
        second.handle.commit_transaction().await?;

        first.shutdown().await?;
        second.shutdown().await
    });

    sim.run().unwrap();
}

#[test]
fn reflected_message_is_applied_and_acknowledged() {
    let mut sim = simulation();
    let group = Group::new(MediatorConfig::default());
    group.serve(&mut sim);

    let receiver_store = Arc::new(MemoryStore::new());
    receiver_store.insert_contact(contact("ECHOECHO"));
    let observed = Arc::clone(&receiver_store);

    sim.client("devices", async move {
        let sender = group.device(1, &Arc::new(MemoryStore::new())).await?;
        let receiver = group.device(2, &receiver_store).await?;

        let body = MessageContent::Text(Text { text: "hello".into() }).encode()?;
        outbound::reflect_incoming_message(&sender.handle, IncomingMessage {
            sender_identity: "ECHOECHO".into(),
            message_id: MessageId(1),
            created_at: 1_700_000_000_000,
            kind: MessageKind::Text,
            body,
            nonce: [1; 24],
        })
        .await?;

        let env = receiver.env.clone();
        let store = Arc::clone(&receiver_store);
        wait_until(&env, DEADLINE, "message", move || store.incoming_messages().len() == 1)
            .await?;
        let mediator = group.mediator.clone();
        wait_until(&env, DEADLINE, "ack", move || mediator.inspect(|state| state.queued(2)) == 0)
            .await?;

        sender.shutdown().await?;
        receiver.shutdown().await
    });

    sim.run().unwrap();
    let messages = observed.incoming_messages();
    assert_eq!(messages[0].sender.as_deref(), Some("ECHOECHO"));
    assert_eq!(messages[0].content, MessageContent::Text(Text { text: "hello".into() }));
}

#[test]
fn offline_device_gets_its_queue_then_queue_dry() {
    let mut sim = simulation();
    let group = Group::new(MediatorConfig::default());
    group.serve(&mut sim);

    let offline_store = Arc::new(MemoryStore::new());
    let observed = Arc::clone(&offline_store);

    sim.client("devices", async move {
        let leader_store = Arc::new(MemoryStore::new());
        let leader = group.device(1, &leader_store).await?;
        group.device(2, &offline_store).await?.shutdown().await?;

        let accumulator = ContactDeltaAccumulator::default();
        for index in 0..3 {
            let contact = scenario_contact(index);
            accumulator.mark_added(&contact.identity);
            leader_store.insert_contact(contact);
        }
        accumulator.sync(&leader.env, &leader.handle, &leader.collaborators).await?;
        assert_eq!(group.mediator.inspect(|state| state.queued(2)), 3);

        let mut returning = group.device(2, &offline_store).await?;
        loop {
            match returning.next_event().await {
                Some(LinkEvent::ReflectionQueueDry) => break,
                Some(_) => {},
                None => panic!("link ended before the queue ran dry"),
            }
        }
        let store = Arc::clone(&offline_store);
        wait_until(&returning.env, DEADLINE, "contacts", move || store.contacts().len() == 3)
            .await?;

        leader.shutdown().await?;
        returning.shutdown().await
    });

    sim.run().unwrap();
    assert_eq!(observed.queue_dry_count(), 2);
}

#[test]
fn devices_info_and_drop_device() {
    let mut sim = simulation();
    let group = Group::new(MediatorConfig::default());
    group.serve(&mut sim);

    sim.client("devices", async move {
        let first = group.device(1, &Arc::new(MemoryStore::new())).await?;
        let second = group.device(2, &Arc::new(MemoryStore::new())).await?;

        let devices = first.handle.devices_info().await?;
        let labels: Vec<Option<String>> = devices
            .iter()
            .map(|device| device.info.as_ref().map(|info| info.label.clone()))
            .collect();
        assert_eq!(labels, vec![Some("device-1".to_owned()), Some("device-2".to_owned())]);

        first.handle.drop_device(2).await?;
        let dropped = second.join().await?;
        assert!(
            matches!(dropped, Err(LinkError::ConnectionLost | LinkError::Transport(_))),
            "dropped device link ended with {dropped:?}"
        );

        let remaining = first.handle.devices_info().await?;
        assert_eq!(remaining.iter().map(|device| device.device_id).collect::<Vec<_>>(), vec![1]);

        first.shutdown().await
    });

    sim.run().unwrap();
}

#[test]
fn chat_frames_pass_through_the_mediator() {
    let mut sim = simulation();
    let group = Group::new(MediatorConfig::default());
    group.serve(&mut sim);

    sim.client("device-1", async move {
        let mut device = group.device(1, &Arc::new(MemoryStore::new())).await?;

        device.handle.send_chat(Bytes::from_static(b"ping")).await?;
        let mediator = group.mediator.clone();
        wait_until(&device.env, DEADLINE, "chat", move || {
            mediator.inspect(|state| !state.chat_received().is_empty())
        })
        .await?;
        assert_eq!(
            group.mediator.inspect(|state| state.chat_received().to_vec()),
            vec![(1, Bytes::from_static(b"ping"))]
        );

        group.mediator.deliver_chat(1, b"pong");
        loop {
            match device.next_event().await {
                Some(LinkEvent::ChatFrame(chat)) => {
                    assert_eq!(chat, Bytes::from_static(b"pong"));
                    break;
                },
                Some(_) => {},
                None => panic!("link ended before the chat frame arrived"),
            }
        }

        device.shutdown().await
    });

    sim.run().unwrap();
}

#[test]
fn shared_device_data_is_sealed() {
    let mut sim = simulation();
    let group = Group::new(MediatorConfig::default());
    group.serve(&mut sim);
    let keys = DeviceGroupKeys::from_secret(&group.secret);
    let mediator = group.mediator.clone();

    sim.client("device-1", async move {
        let device = group.device(1, &Arc::new(MemoryStore::new())).await?;
        device.handle.set_shared_device_data(b"wallpaper".to_vec()).await?;

        let mediator = group.mediator.clone();
        wait_until(&device.env, DEADLINE, "shared data", move || {
            mediator.inspect(|state| !state.shared_device_data().is_empty())
        })
        .await?;
        device.shutdown().await
    });

    sim.run().unwrap();
    let sealed = mediator.inspect(|state| state.shared_device_data().to_vec());
    assert_ne!(sealed, b"wallpaper".to_vec());
    assert_eq!(open(keys.shared_device_data(), &sealed).unwrap(), b"wallpaper".to_vec());
}
