/// The body a pipeline run writes to.
///
/// Display steps append markup; the transport turns what is left at the end
/// of the run into the response body.
#[derive(Debug, Default)]
pub struct Sink {
    body: String,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, chunk: &str) {
        self.body.push_str(chunk);
    }

    /// Discard everything written so far.
    pub fn clear(&mut self) {
        self.body.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }
}
