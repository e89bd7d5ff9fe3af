use std::fmt;
use std::str::FromStr;

/// W3C-style trace context carried as an optional prefix line on wire
/// frames: `00-<trace-id>-<span-id>-01\n` followed by the JSON payload.
/// Consumers tolerate frames with and without the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceParent {
    pub trace_id: String,
    pub span_id: String,
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "00-{}-{}-01", self.trace_id, self.span_id)
    }
}

impl FromStr for TraceParent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-');
        let version = parts.next().ok_or(())?;
        let trace_id = parts.next().ok_or(())?;
        let span_id = parts.next().ok_or(())?;
        let flags = parts.next().ok_or(())?;
        if parts.next().is_some() || version != "00" || flags.len() != 2 {
            return Err(());
        }
        if trace_id.len() != 32 || !trace_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(());
        }
        if span_id.len() != 16 || !span_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(());
        }
        Ok(TraceParent {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
        })
    }
}

/// Prepend a traceparent line when one is supplied.
pub fn encode_frame(payload: &str, trace: Option<&TraceParent>) -> String {
    match trace {
        Some(trace) => format!("{trace}\n{payload}"),
        None => payload.to_string(),
    }
}

/// Split a frame into its optional traceparent and the payload. A first
/// line that does not parse as a traceparent is part of the payload.
pub fn decode_frame(text: &str) -> (Option<TraceParent>, &str) {
    if let Some((head, rest)) = text.split_once('\n') {
        if let Ok(trace) = head.parse::<TraceParent>() {
            return (Some(trace), rest);
        }
    }
    (None, text)
}
