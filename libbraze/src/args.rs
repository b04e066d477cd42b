/// Link-time options that influence i386 code generation. Frozen before the
/// scan phase starts.
#[derive(Clone, Copy, Debug)]
pub struct Args {
    pub output_kind: OutputKind,

    /// Whether GOT-indirect and TLS-model relaxations may rewrite
    /// instructions in place.
    pub relax: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OutputKind {
    /// Position-dependent executable.
    Executable,

    /// Position-independent executable.
    PieExecutable,

    SharedObject,
}

impl OutputKind {
    /// True if the output can be loaded at an arbitrary address, in which
    /// case position-dependent code sequences need a GOT base register
    /// (`%ebx`) or a dynamic relocation.
    pub fn is_pic(self) -> bool {
        !matches!(self, OutputKind::Executable)
    }

    /// True if thread-pointer offsets are link-time constants, which is what
    /// the local-exec TLS model requires.
    pub fn is_executable(self) -> bool {
        !matches!(self, OutputKind::SharedObject)
    }
}

impl Default for Args {
    fn default() -> Self {
        Self {
            output_kind: OutputKind::Executable,
            relax: true,
        }
    }
}
