//! [TicketWindow] provides the rendezvous at the heart of a take-a-ticket queue.  One thread (the
//! manager) advances a shared now-serving counter; every other thread holds a ticket number and
//! blocks until the counter reaches it.  The counter and its condition variable live in one object
//! so that every read and every write happens under the same lock.

use std::sync::{Condvar, Mutex};

use biometrics::Counter;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static NEW_TICKET_WINDOW: Counter = Counter::new("wicket.ticket_window.new");
static WAIT_FOR: Counter = Counter::new("wicket.ticket_window.wait_for");
static CALL_NEXT: Counter = Counter::new("wicket.ticket_window.call_next");
static WAKE_ALL: Counter = Counter::new("wicket.ticket_window.wake_all");

/// Register biometrics for the ticket window.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&NEW_TICKET_WINDOW);
    collector.register_counter(&WAIT_FOR);
    collector.register_counter(&CALL_NEXT);
    collector.register_counter(&WAKE_ALL);
}

/////////////////////////////////////////// TicketWindow ///////////////////////////////////////////

/// [TicketWindow] owns the now-serving counter and the condition variable that gates wakeups.  The
/// manager is the sole writer; ticket holders are read-only observers of the counter.
#[derive(Debug)]
pub struct TicketWindow {
    now_serving: Mutex<u64>,
    called: Condvar,
}

impl TicketWindow {
    /// Create a new [TicketWindow] serving ticket 0.
    pub fn new() -> Self {
        NEW_TICKET_WINDOW.click();
        Self {
            now_serving: Mutex::new(0),
            called: Condvar::new(),
        }
    }

    /// Block until the counter reaches `ticket`.  The predicate is rechecked under the lock on
    /// every wakeup, so spurious wakeups and broadcasts meant for other tickets park the thread
    /// again.
    pub fn wait_for(&self, ticket: u64) {
        WAIT_FOR.click();
        let mut now_serving = self.now_serving.lock().unwrap();
        while *now_serving < ticket {
            now_serving = self.called.wait(now_serving).unwrap();
        }
    }

    /// Call the ticket at the head of the line: wake every waiter and advance the counter.  The
    /// broadcast and the increment happen under one lock hold, so a waiter that rechecks its
    /// predicate always sees the advanced counter.  Returns the ticket that was called.
    pub fn call_next(&self) -> u64 {
        CALL_NEXT.click();
        let mut now_serving = self.now_serving.lock().unwrap();
        let called = *now_serving;
        self.called.notify_all();
        *now_serving += 1;
        called
    }

    /// Wake every waiter without advancing the counter.  The manager broadcasts once more after
    /// the final call so the highest ticket cannot be stranded.
    pub fn wake_all(&self) {
        WAKE_ALL.click();
        let _now_serving = self.now_serving.lock().unwrap();
        self.called.notify_all();
    }

    /// The ticket currently being served.
    pub fn serving(&self) -> u64 {
        *self.now_serving.lock().unwrap()
    }
}

impl Default for TicketWindow {
    fn default() -> Self {
        Self::new()
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
