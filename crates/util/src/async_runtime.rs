//! Bridge from the synchronous orchestrator into async store clients.

use std::{future::Future, io, panic, thread};

use tokio::{
    runtime::{Builder, Handle, RuntimeFlavor},
    task,
};

/// Drive `future` to completion from synchronous code.
///
/// Inside a multi-threaded Tokio runtime the current worker is handed over with
/// `block_in_place`. A current-thread runtime cannot give up its only worker, so the
/// future runs on a scoped thread with a runtime of its own; the same happens outside any
/// runtime, minus the thread. The only error this adds is failure to build that runtime.
pub fn block_on<F>(future: F) -> io::Result<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => Ok(task::block_in_place(|| handle.block_on(future))),
        Ok(_) => thread::scope(|scope| match scope.spawn(move || run_to_completion(future)).join() {
            Ok(output) => output,
            Err(payload) => panic::resume_unwind(payload),
        }),
        Err(_) => run_to_completion(future),
    }
}

fn run_to_completion<F: Future>(future: F) -> io::Result<F::Output> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}
