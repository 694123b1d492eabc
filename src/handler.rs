//! The process-wide return trap.
//!
//! Every backend funnels an entry function that returns into
//! [`invoke`], which runs the installed handler or the default one. The
//! handler is stored behind an `RwLock`, but it is cloned out before being
//! called: a handler typically switches away and never returns, and a read
//! guard held on an abandoned stack would wedge every later
//! [`set`]/[`reset`].

use std::process;
use std::sync::{Arc, RwLock};

use crate::Cothread;

type Handler = Arc<dyn Fn(&Cothread) + Send + Sync>;

static HANDLER: RwLock<Option<Handler>> = RwLock::new(None);

pub(crate) fn set(handler: Handler) {
    *HANDLER.write().unwrap() = Some(handler);
}

pub(crate) fn reset() {
    *HANDLER.write().unwrap() = None;
}

/// Invoked by the entry shim when a cothread's entry function returns.
pub(crate) fn invoke(returned: &Cothread) {
    let handler = HANDLER.read().unwrap().clone();
    match handler {
        Some(handler) => handler(returned),
        None => default_handler(returned),
    }
}

fn default_handler(returned: &Cothread) -> ! {
    eprintln!("{returned:?} returned from its entry point");
    process::abort();
}
