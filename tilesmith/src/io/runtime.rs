//! Dedicated thread running a Tokio runtime.

pub struct Runtime {
    join_handle: Option<std::thread::JoinHandle<()>>,
    quit_tx: tokio::sync::mpsc::UnboundedSender<()>,
}

impl Runtime {
    /// Spawn a thread named `name` and run `f` on it until the runtime is dropped or `f`
    /// returns.
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let (quit_tx, mut quit_rx) = tokio::sync::mpsc::unbounded_channel();

        let join_handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(error) => {
                        log::error!("Could not create the Tokio runtime: {error}.");
                        return;
                    }
                };

                runtime.block_on(async move {
                    tokio::select! {
                        () = f => log::debug!("Worker loop finished."),
                        _ = quit_rx.recv() => log::debug!("Worker thread asked to quit."),
                    }
                });
            });

        let join_handle = match join_handle {
            Ok(join_handle) => Some(join_handle),
            Err(error) => {
                log::error!("Could not spawn the worker thread: {error}.");
                None
            }
        };

        Self {
            join_handle,
            quit_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|join_handle| !join_handle.is_finished())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Thread might be dead, nothing to do in this case.
        let _ = self.quit_tx.send(());

        if let Some(join_handle) = self.join_handle.take() {
            log::debug!("Waiting for the worker thread to exit.");
            let _ = join_handle.join();
        }

        log::debug!("Worker thread is down.");
    }
}
