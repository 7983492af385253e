use std::collections::BTreeMap;

use grok_provider::StreamEvent;

/// One fully-assembled tool call from a streaming response.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedToolCall {
    pub index: u32,
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Assembles content and tool-call deltas from a stream. Calls are keyed by
/// their wire `index`, so argument slices that arrive out of order (or
/// before their call's start chunk) still land on the right call.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pub text: String,
    calls: BTreeMap<u32, AccumulatedToolCall>,
    pub usage: Option<grok_provider::Usage>,
    pub done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta(text) => self.text.push_str(text),
            StreamEvent::ToolCallStart { index, id, name } => {
                let entry = self.calls.entry(*index).or_insert(AccumulatedToolCall {
                    index: *index,
                    id: String::new(),
                    name: String::new(),
                    arguments: String::new(),
                });
                if !id.is_empty() {
                    entry.id = id.clone();
                }
                if !name.is_empty() {
                    entry.name = name.clone();
                }
            }
            StreamEvent::ToolCallDelta {
                index,
                arguments_delta,
            } => {
                let entry = self.calls.entry(*index).or_insert(AccumulatedToolCall {
                    index: *index,
                    id: String::new(),
                    name: String::new(),
                    arguments: String::new(),
                });
                entry.arguments.push_str(arguments_delta);
            }
            StreamEvent::Usage(usage) => self.usage = Some(usage.clone()),
            StreamEvent::Done => self.done = true,
            _ => {}
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    /// Tool calls in wire-index order, the order the model emitted them.
    pub fn tool_calls(&self) -> Vec<AccumulatedToolCall> {
        self.calls.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_text_and_calls() {
        let mut acc = StreamAccumulator::new();
        acc.process(&StreamEvent::TextDelta("Let me ".into()));
        acc.process(&StreamEvent::TextDelta("check.".into()));
        acc.process(&StreamEvent::ToolCallStart {
            index: 0,
            id: "call_1".into(),
            name: "view_file".into(),
        });
        acc.process(&StreamEvent::ToolCallDelta {
            index: 0,
            arguments_delta: "{\"path\":".into(),
        });
        acc.process(&StreamEvent::ToolCallDelta {
            index: 0,
            arguments_delta: "\"a.ts\"}".into(),
        });

        assert_eq!(acc.text, "Let me check.");
        let calls = acc.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "view_file");
        assert_eq!(calls[0].arguments, "{\"path\":\"a.ts\"}");
    }

    #[test]
    fn out_of_order_indexes_assemble_correctly() {
        let mut acc = StreamAccumulator::new();
        // The second call's delta arrives before the first call's start.
        acc.process(&StreamEvent::ToolCallDelta {
            index: 1,
            arguments_delta: "{\"pattern\":\"x\"}".into(),
        });
        acc.process(&StreamEvent::ToolCallStart {
            index: 0,
            id: "call_a".into(),
            name: "bash".into(),
        });
        acc.process(&StreamEvent::ToolCallStart {
            index: 1,
            id: "call_b".into(),
            name: "search".into(),
        });
        acc.process(&StreamEvent::ToolCallDelta {
            index: 0,
            arguments_delta: "{\"command\":\"ls\"}".into(),
        });

        let calls = acc.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "bash");
        assert_eq!(calls[0].arguments, "{\"command\":\"ls\"}");
        assert_eq!(calls[1].name, "search");
        assert_eq!(calls[1].id, "call_b");
        assert_eq!(calls[1].arguments, "{\"pattern\":\"x\"}");
    }

    #[test]
    fn usage_and_done_are_recorded() {
        let mut acc = StreamAccumulator::new();
        acc.process(&StreamEvent::Usage(grok_provider::Usage {
            input_tokens: 5,
            output_tokens: 7,
        }));
        acc.process(&StreamEvent::Done);
        assert!(acc.done);
        assert_eq!(acc.usage.unwrap().output_tokens, 7);
    }
}
