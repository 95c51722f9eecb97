//! Two-user walkthrough against the in-memory backends: sign up, chat,
//! reply, react, and print the resulting room.

use anyhow::Result;

use parlor_auth::MemoryAuthBackend;
use parlor_client::push::MemoryPushBackend;
use parlor_client::ChatApp;
use parlor_store::{MemoryBlobBackend, MemoryStoreBackend};

#[tokio::main]
async fn main() -> Result<()> {
    parlor_client::init_tracing();

    let (store, _store_handle) = MemoryStoreBackend::spawn();

    let mut ada = spawn_app(&store);
    let mut bob = spawn_app(&store);

    ada.sign_up("ada@example.com", "hunter42").await?;
    bob.sign_up("bob@example.com", "hunter42").await?;

    let ada_messages = &ada.active().expect("ada signed in").messages;
    ada_messages.send("hi").await?;

    // Bob waits for Ada's message, then replies to it.
    let bob_messages = &bob.active().expect("bob signed in").messages;
    let mut room = bob_messages.messages();
    while room.borrow_and_update().is_empty() {
        room.changed().await?;
    }
    let greeting = room.borrow().first().cloned().expect("greeting arrived");
    bob_messages.begin_reply(&greeting);
    bob_messages.send("yo").await?;

    while room.borrow_and_update().len() < 2 {
        room.changed().await?;
    }
    let reply = room.borrow().last().cloned().expect("reply arrived");

    // Both react to the reply; the toggles merge.
    let (a, b) = tokio::join!(
        ada.toggle_reaction(&reply.id, "❤️"),
        bob.toggle_reaction(&reply.id, "❤️"),
    );
    a?;
    b?;

    loop {
        room.changed().await?;
        let list = room.borrow_and_update().clone();
        if list
            .last()
            .and_then(|m| m.reactions.get("❤️"))
            .is_some_and(|r| r.len() == 2)
        {
            for message in &list {
                let reactions: Vec<String> = message
                    .reactions
                    .iter()
                    .map(|(emoji, uids)| format!("{emoji} x{}", uids.len()))
                    .collect();
                println!(
                    "{:>8}  {}  {}",
                    message.sender_label(),
                    message.text,
                    reactions.join(" ")
                );
            }
            break;
        }
    }

    ada.sign_out().await?;
    bob.sign_out().await?;
    Ok(())
}

fn spawn_app(store: &parlor_store::StoreClient) -> ChatApp {
    let (auth, _auth_handle) = MemoryAuthBackend::spawn();
    let blobs = MemoryBlobBackend::spawn();
    let (push, _push_handle) = MemoryPushBackend::spawn(true, false);
    let (app, _events) = ChatApp::new(store.clone(), auth, blobs, push);
    app
}
