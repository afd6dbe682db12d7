//! Presence over the in-memory hub.

mod common;

use common::{eventually, fast_config, key, World};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{CursorPosition, Identity, MemoryCache, ParticipantId};
use tandem_sync::PresenceHandle;

fn names(handle: &PresenceHandle) -> Vec<String> {
    handle
        .online()
        .into_iter()
        .map(|state| state.identity.display_name)
        .collect()
}

fn identity(name: &str) -> Identity {
    Identity::new(ParticipantId::new(), name, "#3366ff")
}

#[tokio::test(start_paused = true)]
async fn joiners_see_each_other_immediately() {
    let world = World::new();
    let provider = world.provider(fast_config());

    let ada = provider.join_presence(&key(), identity("Ada"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let grace = provider.join_presence(&key(), identity("Grace"));

    // Grace learns about Ada from the reply to her join, long before the
    // first heartbeat.
    eventually("both to see each other", || {
        ada.peers().len() == 1 && grace.peers().len() == 1
    })
    .await;
    assert_eq!(names(&ada), vec!["Ada", "Grace"]);
    assert_eq!(names(&grace), vec!["Grace", "Ada"]);
}

#[tokio::test(start_paused = true)]
async fn cursor_and_typing_propagate_and_typing_expires() {
    let world = World::new();
    let provider = world.provider(fast_config());
    let ada = provider.join_presence(&key(), identity("Ada"));
    let grace = provider.join_presence(&key(), identity("Grace"));
    eventually("join", || grace.peers().len() == 1).await;

    ada.update_cursor(Some(CursorPosition { anchor: 2, head: 7 }));
    ada.update_typing(true);
    eventually("cursor and typing", || {
        grace.peers().first().is_some_and(|peer| {
            peer.typing && peer.cursor == Some(CursorPosition { anchor: 2, head: 7 })
        })
    })
    .await;

    // No keystroke for longer than the typing timeout.
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(!ada.local_state().typing);
    eventually("typing to clear", || {
        grace.peers().first().is_some_and(|peer| !peer.typing)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn leave_removes_the_entry() {
    let world = World::new();
    let provider = world.provider(fast_config());
    let ada = provider.join_presence(&key(), identity("Ada"));
    let grace = provider.join_presence(&key(), identity("Grace"));
    eventually("join", || grace.peers().len() == 1).await;

    let mut roster = grace.watch();
    ada.leave().await;
    roster
        .wait_for(|online| online.len() == 1)
        .await
        .unwrap();
    assert!(grace.peers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn silent_peer_expires_after_ttl() {
    let world = World::new();
    let ada_id = ParticipantId::new();
    let ada_provider =
        world.provider_with_cache(ada_id, Arc::new(MemoryCache::new()), fast_config());
    let grace_provider = world.provider(fast_config());

    let ada = ada_provider.join_presence(&key(), Identity::new(ada_id, "Ada", "#ff0000"));
    let grace = grace_provider.join_presence(&key(), identity("Grace"));
    eventually("join", || grace.peers().len() == 1).await;

    // Ada's device drops off without saying goodbye.
    world.hub.set_offline(ada_id, true);

    // Heartbeats stop; within the TTL she still shows, after it she never does.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(grace.peers().len(), 1);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(grace.peers().is_empty());

    // Coming back resubscribes and rejoins.
    world.hub.set_offline(ada_id, false);
    eventually("rejoin", || grace.peers().len() == 1).await;
    drop(ada);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_leaves() {
    let world = World::new();
    let provider = world.provider(fast_config());
    let ada = provider.join_presence(&key(), identity("Ada"));
    let grace = provider.join_presence(&key(), identity("Grace"));
    eventually("join", || grace.peers().len() == 1).await;

    drop(ada);
    eventually("ada to leave", || grace.peers().is_empty()).await;
}
