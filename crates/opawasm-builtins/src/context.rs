/// Call-site information handed to every built-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinContext {
    /// Fully-qualified built-in name, without the arity suffix.
    pub function_name: String,
    /// Opaque context id the guest passed along with the call.
    pub opa_context: i32,
    /// Whether errors from this call abort the evaluation.
    pub strict: bool,
}
