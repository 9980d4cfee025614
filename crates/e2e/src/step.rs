//! Named, nestable reporting steps
//!
//! `StepRecorder::step` wraps a unit of work. Steps opened while another is
//! running nest under it, so the recorded tree mirrors the scenario's logical
//! grouping. A step never alters the outcome of its work: errors are recorded
//! and handed back unchanged. The step closes on every exit path, including
//! when the wrapping future is dropped mid-flight (scenario cancellation).

use std::future::Future;
use parking_lot::Mutex;
use tracing::{debug, info_span, Instrument};

use crate::error::{E2eError, E2eResult};
use crate::report::{
    attachment_extension, now_millis, Attachment, AttachmentContent, Stage, Status,
    StatusDetails, StepRecord,
};

/// Everything a scenario recorded, ready for the result file
#[derive(Debug, Default)]
pub struct Recording {
    pub steps: Vec<StepRecord>,
    /// Attachments made outside of any step
    pub attachments: Vec<Attachment>,
    pub contents: Vec<AttachmentContent>,
    /// Steps that were open when the first failure surfaced, outermost first
    pub failure_path: Vec<String>,
}

#[derive(Default)]
struct RecorderState {
    open: Vec<StepRecord>,
    finished: Vec<StepRecord>,
    attachments: Vec<Attachment>,
    contents: Vec<AttachmentContent>,
    failure_path: Option<Vec<String>>,
}

/// Per-scenario step tree. Scenarios run their steps sequentially, so a
/// stack of open steps is all the nesting bookkeeping needed.
#[derive(Default)]
pub struct StepRecorder {
    state: Mutex<RecorderState>,
}

impl StepRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` inside a step called `name`
    pub async fn step<T, Fut>(&self, name: impl Into<String>, work: Fut) -> E2eResult<T>
    where
        Fut: Future<Output = E2eResult<T>>,
    {
        let name = name.into();
        let span = info_span!("step", name = %name);
        let guard = self.open(name);

        let result = work.instrument(span).await;

        match &result {
            Ok(_) => guard.close(Status::Passed, None),
            Err(e) => guard.close(status_for(e), Some(StatusDetails::message(e.to_string()))),
        }
        result
    }

    /// Attach bytes to the innermost open step (or the scenario itself).
    /// Returns the attachment's file name in the results directory.
    pub fn attach(&self, name: impl Into<String>, content_type: &str, bytes: Vec<u8>) -> String {
        let source = format!(
            "{}-attachment.{}",
            uuid::Uuid::new_v4(),
            attachment_extension(content_type)
        );
        let attachment = Attachment {
            name: name.into(),
            source: source.clone(),
            content_type: content_type.to_string(),
        };

        let mut state = self.state.lock();
        match state.open.last_mut() {
            Some(step) => step.attachments.push(attachment),
            None => state.attachments.push(attachment),
        }
        state.contents.push(AttachmentContent {
            source: source.clone(),
            bytes,
        });
        source
    }

    /// Close anything still open and hand back the recorded tree
    pub fn finish(self) -> Recording {
        {
            let depth = self.state.lock().open.len();
            if depth > 0 {
                self.close(0, Status::Broken, Some(interrupted()), Stage::Interrupted);
            }
        }

        let state = self.state.into_inner();
        Recording {
            steps: state.finished,
            attachments: state.attachments,
            contents: state.contents,
            failure_path: state.failure_path.unwrap_or_default(),
        }
    }

    fn open(&self, name: String) -> StepGuard<'_> {
        debug!(step = %name, "step started");
        let mut state = self.state.lock();
        let depth = state.open.len();
        state.open.push(StepRecord::started(name));
        StepGuard {
            recorder: self,
            depth,
            closed: false,
        }
    }

    /// Close the step at `depth`, first closing any children left open above it
    fn close(&self, depth: usize, status: Status, details: Option<StatusDetails>, stage: Stage) {
        let mut state = self.state.lock();
        if state.open.len() <= depth {
            return;
        }

        while state.open.len() > depth + 1 {
            let child = state.open.len() - 1;
            finalize_top(&mut state, child, Status::Broken, Some(interrupted()), Stage::Interrupted);
        }
        finalize_top(&mut state, depth, status, details, stage);
    }
}

fn finalize_top(
    state: &mut RecorderState,
    depth: usize,
    status: Status,
    details: Option<StatusDetails>,
    stage: Stage,
) {
    if status != Status::Passed && state.failure_path.is_none() {
        state.failure_path = Some(state.open[..=depth].iter().map(|s| s.name.clone()).collect());
    }

    let Some(mut step) = state.open.pop() else {
        return;
    };
    step.status = status;
    step.status_details = details;
    step.stage = stage;
    step.stop = now_millis();
    debug!(step = %step.name, status = ?step.status, "step finished");

    match state.open.last_mut() {
        Some(parent) => parent.steps.push(step),
        None => state.finished.push(step),
    }
}

fn status_for(error: &E2eError) -> Status {
    if error.is_assertion() {
        Status::Failed
    } else {
        Status::Broken
    }
}

fn interrupted() -> StatusDetails {
    StatusDetails::message("step interrupted before completion")
}

struct StepGuard<'a> {
    recorder: &'a StepRecorder,
    depth: usize,
    closed: bool,
}

impl StepGuard<'_> {
    fn close(mut self, status: Status, details: Option<StatusDetails>) {
        self.recorder.close(self.depth, status, details, Stage::Finished);
        self.closed = true;
    }
}

impl Drop for StepGuard<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.recorder
                .close(self.depth, Status::Broken, Some(interrupted()), Stage::Interrupted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nests_steps_in_call_order() {
        let steps = StepRecorder::new();

        steps
            .step("outer", async {
                steps.step("first", async { Ok(()) }).await?;
                steps.step("second", async { Ok(()) }).await
            })
            .await
            .unwrap();

        let recording = steps.finish();
        assert_eq!(recording.steps.len(), 1);
        let outer = &recording.steps[0];
        assert_eq!(outer.name, "outer");
        assert_eq!(outer.status, Status::Passed);
        assert_eq!(outer.stage, Stage::Finished);
        let names: Vec<&str> = outer.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
        assert!(recording.failure_path.is_empty());
    }

    #[tokio::test]
    async fn returns_the_work_value() {
        let steps = StepRecorder::new();
        let value = steps.step("compute", async { Ok(41 + 1) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn dropped_guard_marks_step_interrupted() {
        let steps = StepRecorder::new();
        let guard = steps.open("cancelled".to_string());
        drop(guard);

        let recording = steps.finish();
        assert_eq!(recording.steps[0].status, Status::Broken);
        assert_eq!(recording.steps[0].stage, Stage::Interrupted);
        assert_eq!(recording.failure_path, vec!["cancelled".to_string()]);
    }

    #[test]
    fn attachments_land_on_innermost_open_step() {
        let steps = StepRecorder::new();
        let outer = steps.open("outer".to_string());
        let inner = steps.open("inner".to_string());
        let source = steps.attach("Screenshot", "image/png", vec![1, 2, 3]);
        inner.close(Status::Passed, None);
        outer.close(Status::Passed, None);
        steps.attach("log", "text/plain", b"done".to_vec());

        let recording = steps.finish();
        assert!(source.ends_with("-attachment.png"));
        assert_eq!(recording.steps[0].steps[0].attachments[0].source, source);
        assert_eq!(recording.attachments[0].name, "log");
        assert_eq!(recording.contents.len(), 2);
    }
}
