/// Some relaxations rewrite a pair of relocations at once. When that happens,
/// the relocation that followed the pair's first member has already been
/// consumed and must not be applied separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationModifier {
    Normal,
    SkipNextRelocation,
}
