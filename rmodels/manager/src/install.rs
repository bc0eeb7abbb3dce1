use std::path::Path;

use rmodels_protocol::RSession;
use rmodels_schema::ModelConfiguration;
use rmodels_scripting::{
    commit_program, staged_name, teardown_program, NamespacePlan, ScriptGenerator,
    ATTRIBUTE_NAMES, FACTOR_COLUMNS, NUMERIC_COLUMNS,
};

use crate::error::ManagerResult;

/// Builds `namespace` around `artifact` under a staged binding, then rebinds it.
///
/// Nothing visible under `namespace` changes unless every step succeeds; on
/// failure the staged binding is removed and the error returned.
pub fn install_namespace<S: RSession + ?Sized>(
    session: &mut S,
    config: &ModelConfiguration,
    namespace: &str,
    artifact: &Path,
    export: &Path,
    predict_code: Option<&str>,
) -> ManagerResult<()> {
    let generator = ScriptGenerator::new(config)?;
    let staged = staged_name(namespace);
    let plan = generator.namespace_plan(&staged, artifact, export, predict_code)?;
    let outcome = build(session, &plan).and_then(|()| {
        session.evaluate(&commit_program(&staged, namespace))?;
        Ok(())
    });
    if outcome.is_err() {
        // The original failure is the one worth reporting.
        let _ = session.evaluate(&teardown_program(&staged));
    }
    outcome
}

/// Removes the binding of `namespace`.
pub fn teardown_namespace<S: RSession + ?Sized>(
    session: &mut S,
    namespace: &str,
) -> ManagerResult<()> {
    session.evaluate(&teardown_program(namespace))?;
    Ok(())
}

fn build<S: RSession + ?Sized>(session: &mut S, plan: &NamespacePlan) -> ManagerResult<()> {
    session.evaluate(&plan.setup)?;
    session.assign_string_list(ATTRIBUTE_NAMES, &plan.binding, &plan.attribute_names)?;
    session.assign_int_list(NUMERIC_COLUMNS, &plan.binding, &plan.numeric_columns)?;
    session.assign_int_list(FACTOR_COLUMNS, &plan.binding, &plan.factor_columns)?;
    session.evaluate(&plan.functions)?;
    Ok(())
}
