use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

pub type Result<T = (), E = anyhow::Error> = core::result::Result<T, E>;

/// Collects non-fatal link problems from concurrently running phases.
/// Structural violations don't come through here; those are `Err` values
/// that terminate the link.
#[derive(Default)]
pub struct Diagnostics {
    errors: crossbeam_queue::SegQueue<anyhow::Error>,
    undefined: Mutex<ahash::AHashSet<String>>,
    errored: AtomicBool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&self, error: anyhow::Error) {
        tracing::error!(%error);
        self.errored.store(true, Ordering::Relaxed);
        self.errors.push(error);
    }

    /// Records a reference to a symbol that no input file defines. Reported
    /// once per symbol no matter how many relocations reference it.
    pub fn undefined_symbol(&self, name: &str) {
        let mut seen = self.undefined.lock().unwrap();
        if seen.insert(name.to_owned()) {
            self.error(anyhow::anyhow!("undefined symbol: {name}"));
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn range_error(
        &self,
        section: &str,
        rel_name: &str,
        sym: &str,
        value: i64,
        min: i64,
        max: i64,
    ) {
        self.error(anyhow::anyhow!(
            "{section}: relocation {rel_name} against `{sym}` out of range: \
             {value} is not in [{min}, {max})"
        ));
    }

    /// True if any problem was recorded; the link's exit status is failure.
    pub fn has_errors(&self) -> bool {
        self.errored.load(Ordering::Relaxed)
    }

    pub fn take_errors(&self) -> Vec<anyhow::Error> {
        let mut out = Vec::new();
        while let Some(e) = self.errors.pop() {
            out.push(e);
        }
        out
    }
}
