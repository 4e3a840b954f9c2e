use debug_allocator::Tracker;
use tokio::{
    runtime::Builder,
    sync::{mpsc, Barrier},
};
use tracing::Level;

use std::sync::Arc;

// Blocks are handed between tasks as raw addresses, since the tracker only deals in pointers.
#[derive(Debug)]
struct Buffer(usize);

// The tracker shared by both tasks. A `static` works just as well as the crate-level functions, and keeps this demo's
// books separate from anything else in the process.
static TRACKER: Tracker = Tracker::system();

fn main() {
    // Every tracked operation emits a trace-level event, so turning the level all the way up shows each allocation,
    // reallocation and free as it happens.
    tracing_subscriber::fmt().with_max_level(Level::TRACE).init();

    // Now we create our asynchronous runtime (Tokio) and spawn two simple tasks that ping-pong buffers to each other.
    // Each task allocates its own buffers and frees the ones it receives, so every site ends up with as many frees as
    // allocations, even though no task ever frees what it allocated itself.
    let basic_rt = Builder::new_current_thread()
        .build()
        .expect("failed to build current-thread runtime");

    basic_rt.block_on(async move {
        // Create a barrier so our tasks start only after they've both been created.
        let barrier1 = Arc::new(Barrier::new(2));
        let barrier2 = Arc::clone(&barrier1);

        // Create the ping-pong channels.
        let (tx1, rx2) = mpsc::channel(1);
        let (tx2, rx1) = mpsc::channel(1);

        let handle1 = tokio::spawn(ping_pong(barrier1, 16, tx1, rx1));
        let handle2 = tokio::spawn(ping_pong(barrier2, 128, tx2, rx2));

        handle1.await.expect("task1 panicked unexpectedly");
        handle2.await.expect("task2 panicked unexpectedly");
    });

    TRACKER.report(0);
    assert_eq!(TRACKER.consumption(), 0);
    assert!(TRACKER.scan_for_corruption());
}

async fn ping_pong(
    barrier: Arc<Barrier>,
    buf_size: usize,
    tx: mpsc::Sender<Buffer>,
    mut rx: mpsc::Receiver<Buffer>,
) {
    barrier.wait().await;

    for _ in 0..3 {
        // We allocate this buffer on our side, grow it, and send it to the other task to be freed.
        let buf = TRACKER.allocate(buf_size);
        let buf = TRACKER.reallocate(buf, buf_size * 2);
        tx.send(Buffer(buf as usize))
            .await
            .expect("tx send should not fail");

        // We receive another buffer from the other, and free it for them.
        let their_buf = rx.recv().await.expect("rx recv should not be empty");
        TRACKER.free(their_buf.0 as *mut u8);
    }
}
