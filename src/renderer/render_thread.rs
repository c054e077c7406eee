use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::error::{RenderError, Result};
use crate::gpu::GpuBackend;
use crate::renderer::renderer::Renderer;

type Job<B> = Box<dyn FnOnce(&mut Renderer<B>) + Send>;

/// A worker thread that owns the renderer. Other threads hand it closures and wait on the
/// returned receiver for results.
pub struct RenderThread<B: GpuBackend + 'static> {
    jobs: Option<mpsc::Sender<Job<B>>>,
    handle: Option<JoinHandle<()>>,
}

impl<B: GpuBackend + 'static> RenderThread<B> {
    /// Builds the renderer on the new thread, so the backend never has to cross threads.
    pub fn spawn<F>(create: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Renderer<B>> + Send + 'static,
    {
        let (jobs, job_receiver) = mpsc::channel::<Job<B>>();
        let (started, started_receiver) = mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name("render".to_string())
            .spawn(move || {
                let mut renderer = match create() {
                    Ok(renderer) => {
                        let _ = started.send(Ok(()));
                        renderer
                    }
                    Err(err) => {
                        log::error!("RenderThread: renderer failed to start: {}", err);
                        let _ = started.send(Err(err));
                        return;
                    }
                };

                while let Ok(job) = job_receiver.recv() {
                    job(&mut renderer);
                }

                renderer.shut_down();
                log::info!("RenderThread: exiting");
            })
            .map_err(|_| RenderError::RenderThreadGone)?;

        match started_receiver.recv() {
            Ok(Ok(())) => Ok(Self {
                jobs: Some(jobs),
                handle: Some(handle),
            }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(RenderError::RenderThreadGone)
            }
        }
    }

    /// Queues `work` and returns where its result will arrive.
    pub fn dispatch<T, F>(&self, work: F) -> Result<mpsc::Receiver<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Renderer<B>) -> T + Send + 'static,
    {
        let (result, result_receiver) = mpsc::channel();
        let job: Job<B> = Box::new(move |renderer| {
            // The caller may have stopped waiting
            let _ = result.send(work(renderer));
        });

        self.jobs
            .as_ref()
            .ok_or(RenderError::RenderThreadGone)?
            .send(job)
            .map_err(|_| RenderError::RenderThreadGone)?;
        Ok(result_receiver)
    }

    pub fn dispatch_for_result<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Renderer<B>) -> T + Send + 'static,
    {
        self.dispatch(work)?
            .recv()
            .map_err(|_| RenderError::RenderThreadGone)
    }

    /// Drains queued work, shuts the renderer down and joins the thread.
    pub fn shut_down(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("RenderThread: render thread panicked");
            }
        }
    }
}

impl<B: GpuBackend + 'static> Drop for RenderThread<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RecordingBackend;
    use crate::settings::RenderSettings;

    fn spawn() -> RenderThread<RecordingBackend> {
        RenderThread::spawn(|| Renderer::start_up(RecordingBackend::new(), RenderSettings::default()))
            .unwrap()
    }

    #[test]
    fn work_runs_in_submission_order() {
        let thread = spawn();
        let first = thread.dispatch(|renderer| renderer.create_object_id()).unwrap();
        let second = thread.dispatch(|renderer| renderer.create_object_id()).unwrap();

        assert_eq!(first.recv().unwrap().0, 1);
        assert_eq!(second.recv().unwrap().0, 2);
        thread.shut_down();
    }

    #[test]
    fn failed_start_up_is_reported() {
        let result = RenderThread::<RecordingBackend>::spawn(|| {
            let mut gpu = RecordingBackend::new();
            gpu.fail_buffer_creation = true;
            Renderer::start_up(gpu, RenderSettings::default())
        });
        assert!(matches!(result, Err(RenderError::BufferCreation { .. })));
    }

    #[test]
    fn results_come_back_across_threads() {
        let thread = spawn();
        let resolution = thread
            .dispatch_for_result(|renderer| renderer.settings().shadow_map_resolution())
            .unwrap();
        assert_eq!(resolution, RenderSettings::default().shadow_map_resolution());
    }
}
