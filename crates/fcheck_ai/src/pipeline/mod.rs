//! Ordered, named text transformations run as one callable.

use std::fmt;

use fcheck_core::domain::{Device, SentenceProposal};
use fcheck_core::error::{codes, AppError};
use tracing::{debug, instrument};

mod steps;

pub use steps::{CleanText, FnStep, SentenceSegmenter};

use crate::coref::CorefResolver;

/// Data flowing between steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Segments(Vec<String>),
    Sentences(Vec<SentenceProposal>),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Segments(_) => "segments",
            Payload::Sentences(_) => "sentences",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Text(t) => t.trim().is_empty(),
            Payload::Segments(s) => s.is_empty(),
            Payload::Sentences(s) => s.is_empty(),
        }
    }

    /// Error for a step handed a variant it cannot consume.
    pub fn mismatch(&self, step: &str, expected: &str) -> AppError {
        AppError::new(
            codes::PIPELINE_TYPE_MISMATCH,
            "Pipeline step received an unsupported payload",
        )
        .with_details(format!("step={step}; expected={expected}; got={}", self.kind()))
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

/// Capability for components that can be moved between devices.
pub trait DeviceAware {
    fn device(&self) -> Device;
    fn to_device(&mut self, device: Device);
}

/// A pipeline step. Device relocation is an optional capability.
pub trait Transform<T>: Send + Sync {
    fn apply(&self, input: T) -> Result<T, AppError>;

    fn device_aware(&mut self) -> Option<&mut dyn DeviceAware> {
        None
    }

    /// Steps that tokenise a context sentinel adopt the caller's marker here.
    fn set_context_token(&mut self, _token: &str) {}

    fn describe(&self) -> String {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base).to_string()
    }
}

type Step<T> = (String, Box<dyn Transform<T>>);

/// Steps run in registration order. Whether each step accepts the previous
/// step's output is the caller's concern; mismatches surface as errors.
pub struct Pipeline<T = Payload> {
    steps: Vec<Step<T>>,
    device: Device,
}

impl<T> Default for Pipeline<T> {
    fn default() -> Self {
        Self::new(Device::Cpu)
    }
}

impl<T> Pipeline<T> {
    pub fn new(device: Device) -> Self {
        Self {
            steps: Vec::new(),
            device,
        }
    }

    /// Builder form of [`Pipeline::register`].
    pub fn with_step<S>(mut self, name: &str, step: S) -> Result<Self, AppError>
    where
        S: Transform<T> + 'static,
    {
        self.register(name, step)?;
        Ok(self)
    }

    pub fn register<S>(&mut self, name: &str, step: S) -> Result<(), AppError>
    where
        S: Transform<T> + 'static,
    {
        self.register_boxed(name, Box::new(step))
    }

    pub fn register_boxed(&mut self, name: &str, mut step: Box<dyn Transform<T>>) -> Result<(), AppError> {
        if self.contains(name) {
            return Err(AppError::new(
                codes::PIPELINE_DUPLICATE_STEP,
                "Pipeline already contains a step with this name",
            )
            .with_details(format!("name={name}")));
        }
        if let Some(d) = step.device_aware() {
            d.to_device(self.device);
        }
        self.steps.push((name.to_string(), step));
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Result<Box<dyn Transform<T>>, AppError> {
        let pos = self.position(name).ok_or_else(|| {
            AppError::new(
                codes::PIPELINE_UNKNOWN_STEP,
                "Pipeline does not contain a step with this name",
            )
            .with_details(format!("name={name}"))
        })?;
        Ok(self.steps.remove(pos).1)
    }

    #[instrument(skip_all, fields(steps = self.steps.len()))]
    pub fn run(&self, input: T) -> Result<T, AppError> {
        let mut data = input;
        for (name, step) in &self.steps {
            debug!(step = %name, "running pipeline step");
            data = step
                .apply(data)
                .map_err(|e| e.with_context(format!("step={name}")))?;
        }
        Ok(data)
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Relocate every device-aware step; other steps are left untouched.
    pub fn to_device(&mut self, device: Device) {
        self.device = device;
        for (_, step) in &mut self.steps {
            if let Some(d) = step.device_aware() {
                d.to_device(device);
            }
        }
    }

    pub fn set_context_token(&mut self, token: &str) {
        for (_, step) in &mut self.steps {
            step.set_context_token(token);
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Transform<T>> {
        self.steps
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Transform<T> + 'static)> {
        self.steps
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.as_mut())
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|(n, _)| n.as_str()).collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|(n, _)| n == name)
    }
}

impl<T> fmt::Display for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline(")?;
        for (name, step) in &self.steps {
            writeln!(f, "\t({name}): {}", step.describe())?;
        }
        write!(f, ")")
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.names())
            .field("device", &self.device)
            .finish()
    }
}

/// Paragraph splitter used when no pipeline is configured.
pub fn default_paragraph_pipeline() -> Pipeline {
    let mut p = Pipeline::new(Device::Cpu);
    p.steps
        .push(("sentence_reg".to_string(), Box::new(SentenceSegmenter::default())));
    p
}

pub fn coref_pipeline(resolver: CorefResolver, device: Device) -> Pipeline {
    let mut p = Pipeline::new(device);
    let mut step: Box<dyn Transform<Payload>> = Box::new(resolver);
    if let Some(d) = step.device_aware() {
        d.to_device(device);
    }
    p.steps.push(("coref".to_string(), step));
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Placed {
        device: Device,
        moves: Arc<AtomicUsize>,
    }

    impl DeviceAware for Placed {
        fn device(&self) -> Device {
            self.device
        }

        fn to_device(&mut self, device: Device) {
            self.device = device;
            self.moves.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Transform<Payload> for Placed {
        fn apply(&self, input: Payload) -> Result<Payload, AppError> {
            Ok(input)
        }

        fn device_aware(&mut self) -> Option<&mut dyn DeviceAware> {
            Some(self)
        }
    }

    fn upper() -> FnStep<Payload> {
        FnStep::new("upper", |p| match p {
            Payload::Text(t) => Ok(Payload::Text(t.to_uppercase())),
            other => Err(other.mismatch("upper", "text")),
        })
    }

    #[test]
    fn duplicate_and_unknown_names_are_errors() {
        let mut p = Pipeline::default();
        p.register("upper", upper()).unwrap();
        let err = p.register("upper", upper()).unwrap_err();
        assert_eq!(err.code, codes::PIPELINE_DUPLICATE_STEP);

        let err = p.unregister("missing").err().unwrap();
        assert_eq!(err.code, codes::PIPELINE_UNKNOWN_STEP);

        p.unregister("upper").unwrap();
        assert!(p.is_empty());
    }

    #[test]
    fn runs_steps_in_registration_order() {
        let p = Pipeline::default()
            .with_step("clean", CleanText)
            .unwrap()
            .with_step("upper", upper())
            .unwrap()
            .with_step("split", SentenceSegmenter::default())
            .unwrap();
        assert_eq!(p.names(), vec!["clean", "upper", "split"]);

        let out = p.run("  one   two.  three? ".into()).unwrap();
        assert_eq!(
            out,
            Payload::Segments(vec!["ONE TWO.".to_string(), "THREE?".to_string()])
        );
    }

    #[test]
    fn type_mismatch_names_the_step() {
        let p = Pipeline::default()
            .with_step("split", SentenceSegmenter::default())
            .unwrap()
            .with_step("upper", upper())
            .unwrap();
        let err = p.run("a. b.".into()).unwrap_err();
        assert_eq!(err.code, codes::PIPELINE_TYPE_MISMATCH);
        assert!(err.details.unwrap().starts_with("step=upper;"));
    }

    #[test]
    fn relocation_reaches_only_device_aware_steps() {
        let moves = Arc::new(AtomicUsize::new(0));
        let mut p = Pipeline::new(Device::Cuda);
        p.register("upper", upper()).unwrap();
        p.register(
            "placed",
            Placed {
                device: Device::Cpu,
                moves: moves.clone(),
            },
        )
        .unwrap();
        // Registration moves the step onto the pipeline's device.
        assert_eq!(moves.load(Ordering::SeqCst), 1);

        p.to_device(Device::Cpu);
        assert_eq!(moves.load(Ordering::SeqCst), 2);
        assert_eq!(p.device(), Device::Cpu);

        let placed = p.get_mut("placed").unwrap();
        assert_eq!(placed.device_aware().unwrap().device(), Device::Cpu);
    }

    #[test]
    fn display_lists_steps() {
        let p = default_paragraph_pipeline();
        assert!(p.contains("sentence_reg"));
        assert_eq!(p.to_string(), "Pipeline(\n\t(sentence_reg): SentenceSegmenter\n)");
    }
}
