//! Location-keyed sends and cache invalidation.

mod common;

use common::{Echoer, Note, echo_fiber, ping, run_local};
use fibernet::{
    DispatchError, InMemoryLocationDirectory, LocationDirectory, LocationSender, MailboxKind,
    ProcessRouter, error_code,
};

const ROOM: u64 = 42;

#[test]
fn test_call_by_location_and_invalidate_on_not_found() {
    run_local(true, async {
        let router = ProcessRouter::new(1);
        let client = echo_fiber(&router, 1);
        let rooms = echo_fiber(&router, 2);
        client.spawn();
        rooms.spawn();

        let directory = InMemoryLocationDirectory::new();
        let first = rooms.add_entity(Echoer::default(), MailboxKind::Ordered).expect("room");
        directory.register(ROOM, first).await.expect("register");

        let sender = LocationSender::new(client.clone(), directory.clone());
        let pong = sender.call(ROOM, ping("hi")).await.expect("call");
        assert_eq!(pong.responder, first);
        assert_eq!(sender.cached(ROOM), Some(first));

        // The room is recreated under a new id; the cached id is stale.
        rooms.remove_entity(first);
        let second = rooms.add_entity(Echoer::default(), MailboxKind::Ordered).expect("room");
        directory.register(ROOM, second).await.expect("re-register");

        let stale = sender.call(ROOM, ping("hi again")).await.expect("delivered");
        assert_eq!(stale.error, error_code::ERR_NOT_FOUND_ACTOR);
        assert_eq!(sender.cached(ROOM), None);

        let fresh = sender.call(ROOM, ping("third time")).await.expect("call");
        assert_eq!(fresh.error, 0);
        assert_eq!(fresh.responder, second);
    });
}

#[test]
fn test_unknown_location() {
    run_local(true, async {
        let router = ProcessRouter::new(1);
        let client = echo_fiber(&router, 1);
        client.spawn();

        let sender = LocationSender::new(client, InMemoryLocationDirectory::new());
        let err = sender.call(7, ping("x")).await.expect_err("unknown key");
        assert_eq!(err, DispatchError::LocationNotFound { key: 7 });
        assert_eq!(
            sender.send(7, &Note::default()).await,
            Err(DispatchError::LocationNotFound { key: 7 })
        );
    });
}

#[test]
fn test_sends_to_one_location_keep_order() {
    run_local(true, async {
        let router = ProcessRouter::new(1);
        let client = echo_fiber(&router, 1);
        let rooms = echo_fiber(&router, 2);
        client.spawn();
        rooms.spawn();

        let directory = InMemoryLocationDirectory::new();
        let room = rooms.add_entity(Echoer::default(), MailboxKind::Ordered).expect("room");
        directory.register(ROOM, room).await.expect("register");
        let sender = LocationSender::new(client, directory);

        let tasks: Vec<_> = (0..4)
            .map(|n| {
                let sender = sender.clone();
                tokio::task::spawn_local(async move {
                    sender
                        .send(ROOM, &Note { text: n.to_string() })
                        .await
                        .expect("send");
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("task");
        }
        sender.call(ROOM, ping("end")).await.expect("call");

        let entity = rooms.entity::<Echoer>(room).expect("room");
        assert_eq!(*entity.log.borrow(), vec!["0", "1", "2", "3", "end"]);
    });
}
