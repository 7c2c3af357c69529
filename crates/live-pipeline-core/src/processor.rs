//! Frame processors
//!
//! Processors derive a new frame from their input or suppress it. They never
//! mutate the input frame.

use crate::error::Result;
use crate::frame::Frame;
use crate::strategy::Processor;

/// Allow-list of field names
///
/// Output fields follow the order of the list. Unknown names are ignored.
/// A frame left without any field is suppressed.
#[derive(Debug, Clone)]
pub struct KeepFieldsProcessor {
    fields: Vec<String>,
}

impl KeepFieldsProcessor {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl Processor for KeepFieldsProcessor {
    fn process(&self, frame: Frame) -> Result<Option<Frame>> {
        let kept = frame.select(&self.fields);
        Ok((kept.field_count() > 0).then_some(kept))
    }

    fn name(&self) -> &'static str {
        "keepFields"
    }
}

/// Deny-list of field names
#[derive(Debug, Clone)]
pub struct DropFieldsProcessor {
    fields: Vec<String>,
}

impl DropFieldsProcessor {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl Processor for DropFieldsProcessor {
    fn process(&self, frame: Frame) -> Result<Option<Frame>> {
        let rest = frame.without(&self.fields);
        Ok((rest.field_count() > 0).then_some(rest))
    }

    fn name(&self) -> &'static str {
        "dropFields"
    }
}

/// Ordered chain of processors, short-circuits on suppression
pub struct MultipleProcessor {
    processors: Vec<Box<dyn Processor>>,
}

impl MultipleProcessor {
    pub fn new(processors: Vec<Box<dyn Processor>>) -> Self {
        Self { processors }
    }
}

impl Processor for MultipleProcessor {
    fn process(&self, frame: Frame) -> Result<Option<Frame>> {
        let mut current = frame;
        for processor in &self.processors {
            match processor.process(current)? {
                Some(next) => current = next,
                None => {
                    tracing::trace!(processor = processor.name(), "frame suppressed");
                    return Ok(None);
                }
            }
        }
        Ok(Some(current))
    }

    fn name(&self) -> &'static str {
        "multiple"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Field, FieldValues};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn frame() -> Frame {
        let num = |name: &str, v: f64| Field::new(name, FieldValues::Number(vec![Some(v)]));
        Frame::new("f", vec![num("a", 1.0), num("b", 2.0), num("c", 3.0)]).unwrap()
    }

    fn names(frame: &Frame) -> Vec<&str> {
        frame.fields().iter().map(Field::name).collect()
    }

    fn list(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    struct Counting(Arc<AtomicUsize>);

    impl Processor for Counting {
        fn process(&self, frame: Frame) -> Result<Option<Frame>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Some(frame))
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[test]
    fn test_keep_fields() {
        let out = KeepFieldsProcessor::new(list(&["c", "nope", "a"]))
            .process(frame())
            .unwrap()
            .unwrap();
        assert_eq!(names(&out), vec!["c", "a"]);
    }

    #[test]
    fn test_keep_fields_nothing_left_suppresses() {
        let out = KeepFieldsProcessor::new(list(&["nope"])).process(frame()).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_drop_fields() {
        let out = DropFieldsProcessor::new(list(&["b", "nope"]))
            .process(frame())
            .unwrap()
            .unwrap();
        assert_eq!(names(&out), vec!["a", "c"]);
    }

    #[test]
    fn test_multiple_applies_in_order() {
        let chain = MultipleProcessor::new(vec![
            Box::new(DropFieldsProcessor::new(list(&["a"]))),
            Box::new(KeepFieldsProcessor::new(list(&["a", "b"]))),
        ]);
        let out = chain.process(frame()).unwrap().unwrap();
        assert_eq!(names(&out), vec!["b"]);
    }

    #[test]
    fn test_multiple_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = MultipleProcessor::new(vec![
            Box::new(KeepFieldsProcessor::new(list(&["missing"]))),
            Box::new(Counting(calls.clone())),
        ]);
        assert!(chain.process(frame()).unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_multiple_passes_through() {
        let out = MultipleProcessor::new(Vec::new()).process(frame()).unwrap().unwrap();
        assert_eq!(out, frame());
    }
}
