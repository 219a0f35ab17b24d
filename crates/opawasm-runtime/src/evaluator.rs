//! The public evaluation surface.

use std::io::Read;

use opawasm_builtins::CompositeImports;
use opawasm_types::{AbiVersion, PolicyEvaluationResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::abi::{self, AbiAdapter, AbiRevision, DataMutation};
use crate::error::{RuntimeError, RuntimeResult};
use crate::module::PolicyModule;
use crate::options::EvaluatorOptions;
use crate::wasm::WasmGuest;

/// One policy instance with its own memory, base data and built-in state.
///
/// Operations take `&mut self`; an evaluator is used by one caller at a
/// time. Create one per worker to evaluate in parallel.
pub struct Evaluator {
    guest: WasmGuest,
    adapter: Box<dyn AbiAdapter>,
    policy_version: AbiVersion,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("policy_version", &self.policy_version)
            .finish_non_exhaustive()
    }
}

impl Evaluator {
    pub(crate) fn new(
        module: &PolicyModule,
        options: &EvaluatorOptions,
        imports: CompositeImports,
    ) -> RuntimeResult<Self> {
        let mut guest = WasmGuest::instantiate(module, options, imports)?;
        let policy_version = guest.declared_version()?;
        let negotiated = AbiVersion::negotiate(policy_version, options.max_abi_version);
        let revision = AbiRevision::select(negotiated);
        tracing::debug!(
            declared = %policy_version,
            cap = ?options.max_abi_version.map(|v| v.to_string()),
            adapter = %revision.version(),
            "ABI negotiated"
        );

        guest.resolve_exports(revision)?;
        guest.begin()?;
        let adapter = abi::new_adapter(revision, &mut guest)?;
        guest.set_builtins(adapter.base().builtins().clone());

        Ok(Self {
            guest,
            adapter,
            policy_version,
        })
    }

    /// Version of the adapter in use.
    pub fn abi_version(&self) -> AbiVersion {
        self.adapter.revision().version()
    }

    /// Version the module declares.
    pub fn policy_abi_version(&self) -> AbiVersion {
        self.policy_version
    }

    /// Names of the module's entrypoints.
    pub fn entrypoints(&self) -> impl Iterator<Item = &str> {
        self.adapter.base().entrypoints().keys().map(String::as_str)
    }

    // ── Evaluation ───────────────────────────────────────────────────────

    /// Evaluate a boolean rule. An empty result set is `false`.
    pub fn evaluate_predicate<I: Serialize>(&mut self, input: &I, entrypoint: Option<&str>) -> RuntimeResult<bool> {
        let rows: Vec<PolicyEvaluationResult<bool>> = self.evaluate_rows(input, entrypoint)?;
        Ok(rows.into_iter().next().is_some_and(|row| row.result))
    }

    /// First result row, failing with [`RuntimeError::EmptyResult`] when
    /// the policy produced none.
    pub fn evaluate<I, O>(&mut self, input: &I, entrypoint: Option<&str>) -> RuntimeResult<PolicyEvaluationResult<O>>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        self.evaluate_rows(input, entrypoint)?
            .into_iter()
            .next()
            .ok_or(RuntimeError::EmptyResult)
    }

    /// First result row, or `default` when the policy produced none.
    pub fn evaluate_or_default<I, O>(
        &mut self,
        input: &I,
        entrypoint: Option<&str>,
        default: O,
    ) -> RuntimeResult<PolicyEvaluationResult<O>>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let rows = self.evaluate_rows(input, entrypoint)?;
        Ok(rows
            .into_iter()
            .next()
            .unwrap_or_else(|| PolicyEvaluationResult::new(default)))
    }

    /// The whole result set as JSON text: `[{"result": …}, …]`.
    pub fn evaluate_raw(&mut self, input_json: &str, entrypoint: Option<&str>) -> RuntimeResult<String> {
        self.run_eval(input_json.as_bytes(), entrypoint)
    }

    fn evaluate_rows<I, O>(&mut self, input: &I, entrypoint: Option<&str>) -> RuntimeResult<Vec<PolicyEvaluationResult<O>>>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let input = serde_json::to_vec(input)?;
        let raw = self.run_eval(&input, entrypoint)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn run_eval(&mut self, input: &[u8], entrypoint: Option<&str>) -> RuntimeResult<String> {
        let outcome = self
            .guest
            .begin()
            .and_then(|()| self.adapter.eval(&mut self.guest, input, entrypoint));
        self.guest.reset_imports();
        outcome
    }

    // ── Base data ────────────────────────────────────────────────────────

    /// Serialize `data` and make it the base data document.
    pub fn set_data<T: Serialize + ?Sized>(&mut self, data: &T) -> RuntimeResult<()> {
        let bytes = serde_json::to_vec(data)?;
        self.set_data_from_bytes(&bytes)
    }

    pub fn set_data_from_raw_json(&mut self, json: &str) -> RuntimeResult<()> {
        self.set_data_from_bytes(json.as_bytes())
    }

    /// UTF-8 JSON bytes. Empty input clears the base data.
    pub fn set_data_from_bytes(&mut self, json: &[u8]) -> RuntimeResult<()> {
        self.guest.begin()?;
        self.adapter.set_data(&mut self.guest, json)
    }

    pub fn set_data_from_reader<R: Read>(&mut self, mut reader: R) -> RuntimeResult<()> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.set_data_from_bytes(&bytes)
    }

    /// The base data document as JSON, `None` when none is set.
    pub fn dump_data(&mut self) -> RuntimeResult<Option<String>> {
        self.guest.begin()?;
        self.adapter.dump_data(&mut self.guest)
    }

    /// Drop the base data, return the heap to its initial state and clear
    /// built-in state.
    pub fn reset(&mut self) -> RuntimeResult<()> {
        let outcome = self
            .guest
            .begin()
            .and_then(|()| self.adapter.reset(&mut self.guest));
        self.guest.reset_imports();
        outcome
    }

    /// In-place data mutation, when the negotiated ABI supports it.
    pub fn update_data_feature(&mut self) -> Option<UpdateDataFeature<'_>> {
        let mutation = self.adapter.data_mutation()?;
        Some(UpdateDataFeature {
            guest: &mut self.guest,
            mutation,
        })
    }
}

/// Path-level updates of the base data document (ABI 1.3+).
pub struct UpdateDataFeature<'e> {
    guest: &'e mut WasmGuest,
    mutation: &'e mut dyn DataMutation,
}

impl UpdateDataFeature<'_> {
    /// Set `path` to `value`, creating intermediate objects.
    pub fn update_data_path<T: Serialize + ?Sized>(&mut self, value: &T, path: &[&str]) -> RuntimeResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.update_data_path_raw(&bytes, path)
    }

    pub fn update_data_path_raw(&mut self, json: &[u8], path: &[&str]) -> RuntimeResult<()> {
        self.guest.begin()?;
        self.mutation.update_data_path(self.guest, json, path)
    }

    pub fn remove_data_path(&mut self, path: &[&str]) -> RuntimeResult<()> {
        self.guest.begin()?;
        self.mutation.remove_data_path(self.guest, path)
    }
}
