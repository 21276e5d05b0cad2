use uuid::Uuid;

use crate::pipeline::PipelineRequest;

/// A submitted request waiting for the processor.
#[derive(Debug, Clone)]
pub struct RunTask {
    pub id: Uuid,
    pub request: PipelineRequest,
}

impl RunTask {
    pub fn new(request: PipelineRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
        }
    }

    pub fn description(&self) -> String {
        const PREVIEW: usize = 60;
        let text = self.request.text.trim();
        match text.char_indices().nth(PREVIEW) {
            Some((cut, _)) => format!("Run {}: {}...", self.id, &text[..cut]),
            None => format!("Run {}: {text}", self.id),
        }
    }
}
