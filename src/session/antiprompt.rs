/// Markers whose appearance at the tail of the output ends the agent's turn
#[derive(Clone, Debug)]
pub struct AntipromptSet {
    markers: Vec<String>,
    slack: usize,
}

impl AntipromptSet {
    /// `slack` widens the search window by that many bytes, for tokenizers
    /// that glue trailing characters onto the marker.
    pub fn new(markers: Vec<String>, slack: usize) -> Self {
        let markers = markers.into_iter().filter(|m| !m.is_empty()).collect();
        Self { markers, slack }
    }

    /// Marker injected when the session forces a turn boundary
    pub fn primary(&self) -> Option<&str> {
        self.markers.first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// First marker found at the end of `text`, if any
    pub fn find_at_tail(&self, text: &str) -> Option<&str> {
        self.markers
            .iter()
            .find(|marker| {
                let mut start = text.len().saturating_sub(marker.len() + self.slack);
                while !text.is_char_boundary(start) {
                    start -= 1;
                }
                text[start..].contains(marker.as_str())
            })
            .map(String::as_str)
    }
}
