//! Per-model namespace programs.
//!
//! A namespace is an environment bound in the engine's global scope. It holds
//! the loaded model, the attribute name list, the column buckets and two
//! functions, `score` and `export.artifact`. Functions are created with
//! `local(function ..., envir = <ns>)` so their free variables resolve against
//! the namespace no matter which name the environment is bound to later.

use std::path::Path;

use rmodels_protocol::{symbol, RLiteral};
use rmodels_schema::keys;

use crate::{
    builder::{call, RScript},
    error::ScriptError,
    generator::{levels_literal, ScriptGenerator, DEFAULT_PREDICT_ARGUMENTS},
    training::path_literal,
};

/// Namespace variable holding the predictor names.
pub const ATTRIBUTE_NAMES: &str = "attribute.names";
/// Namespace variable holding the one-based numeric predictor columns.
pub const NUMERIC_COLUMNS: &str = "numeric.columns";
/// Namespace variable holding the one-based categorical predictor columns.
pub const FACTOR_COLUMNS: &str = "factor.columns";

/// Everything needed to build one namespace, in execution order: `setup`,
/// then the three seeded lists, then `functions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePlan {
    /// Binding the namespace is built under.
    pub binding: String,
    /// Library loads, environment creation and artifact load.
    pub setup: String,
    /// Sanitized predictor names, bound as [`ATTRIBUTE_NAMES`].
    pub attribute_names: Vec<String>,
    /// Bound as [`NUMERIC_COLUMNS`].
    pub numeric_columns: Vec<i64>,
    /// Bound as [`FACTOR_COLUMNS`].
    pub factor_columns: Vec<i64>,
    /// Level helper, custom prediction code, `score` and `export.artifact`.
    pub functions: String,
}

impl ScriptGenerator<'_> {
    /// Plans the namespace `binding` around the artifact at `artifact`.
    ///
    /// `custom_code` is the content of the configured `predict.file`; it is
    /// evaluated inside the namespace before the scoring function is installed.
    pub fn namespace_plan(
        &self,
        binding: &str,
        artifact: &Path,
        export: &Path,
        custom_code: Option<&str>,
    ) -> Result<NamespacePlan, ScriptError> {
        let ns = symbol(binding);

        let mut setup = RScript::new();
        for library in self.libraries()? {
            setup.library(&library);
        }
        setup.assign(&ns, "new.env()");
        setup.assign(
            format_args!("{ns}$model.name"),
            call(
                "load",
                [
                    format!("file = {}", path_literal(artifact)),
                    format!("envir = {ns}"),
                ],
            ),
        );
        setup.assign(
            format_args!("{ns}$model"),
            format_args!("get({ns}$model.name[1], envir = {ns})"),
        );
        setup.line("invisible(NULL)");

        let mut functions = RScript::new();
        functions.line(self.levels_helper(binding)?);
        if let Some(code) = custom_code {
            functions
                .open("local({")
                .verbatim(code)
                .close(format_args!("}}, envir = {ns})"));
        }
        functions.line(self.scoring_function(binding));
        functions.line(self.export_function(binding, export));
        functions.line("invisible(NULL)");

        Ok(NamespacePlan {
            binding: binding.to_string(),
            setup: setup.finish(),
            attribute_names: self.predictor_names(),
            numeric_columns: self.columns_where(false),
            factor_columns: self.columns_where(true),
            functions: functions.finish(),
        })
    }

    /// `training.levels(column, configured)`: the factor levels the model
    /// recorded for `column`, or `configured` when it recorded none.
    pub fn levels_helper(&self, binding: &str) -> Result<String, ScriptError> {
        let ns = symbol(binding);
        let table = self.levels_table()?;
        let mut script = RScript::new();
        script
            .open(format_args!(
                "{ns}$training.levels <- local(function(column, configured) {{"
            ))
            .assign(
                "table",
                format_args!("tryCatch(model${table}, error = function(e) NULL)"),
            )
            .assign("recorded", "table[[column]]")
            .line("if (is.character(recorded)) recorded else configured")
            .close(format_args!("}}, envir = {ns})"));
        Ok(script.finish().trim_end().to_string())
    }

    /// Assignment installing `score(v)` in the namespace.
    ///
    /// The row is reshaped into a one-row data frame, named, coerced by column
    /// bucket, and every categorical column is re-levelled to the levels the
    /// model was trained with before `predict` runs.
    #[must_use]
    pub fn scoring_function(&self, binding: &str) -> String {
        let ns = symbol(binding);
        let mut script = RScript::new();
        script
            .open(format_args!("{ns}$score <- local(function(v) {{"))
            .assign(
                "v",
                "as.data.frame(t(as.matrix(v)), stringsAsFactors = FALSE)",
            )
            .assign("names(v)", ATTRIBUTE_NAMES)
            .line(format_args!(
                "for (i in {NUMERIC_COLUMNS}) v[[i]] <- as.numeric(v[[i]])"
            ))
            .line(format_args!(
                "for (i in {FACTOR_COLUMNS}) v[[i]] <- as.factor(v[[i]])"
            ));
        for attribute in self.predictors().filter(|a| a.is_categorical()) {
            let column = RLiteral::text(attribute.engine_name());
            script.assign(
                format_args!("v[[{column}]]"),
                format_args!(
                    "factor(as.character(v[[{column}]]), levels = training.levels({column}, {}))",
                    levels_literal(attribute)
                ),
            );
        }
        let arguments = self
            .config
            .property(keys::PREDICT_FUNCTION_ARGUMENTS)
            .unwrap_or(DEFAULT_PREDICT_ARGUMENTS);
        script.assign("r", call("predict", ["model", "v", arguments]));
        if let Some(transform) = self.config.property(keys::PREDICT_RESULT_TRANSFORM) {
            script.assign("r", transform);
        }
        script.line("r").close(format_args!("}}, envir = {ns})"));
        script.finish().trim_end().to_string()
    }

    /// Assignment installing `export.artifact()` in the namespace. The class
    /// attribute's position is recorded as a `classIndex` header extension.
    #[must_use]
    pub fn export_function(&self, binding: &str, export: &Path) -> String {
        let ns = symbol(binding);
        let extension = format!(
            "XML::xmlNode(\"Extension\", attrs = c(name = \"classIndex\", value = {}))",
            RLiteral::text(self.class_index.to_string())
        );
        let mut script = RScript::new();
        script
            .open(format_args!("{ns}$export.artifact <- local(function() {{"))
            .assign("p", "pmml::pmml(model)")
            .assign(
                "p[[\"Header\"]]",
                format_args!("XML::append.XMLNode(p[[\"Header\"]], {extension})"),
            )
            .line(call(
                "XML::saveXML",
                ["p".to_string(), format!("file = {}", path_literal(export))],
            ))
            .line("invisible(NULL)")
            .close(format_args!("}}, envir = {ns})"));
        script.finish().trim_end().to_string()
    }

    /// Calls the namespace's scoring function on one row.
    pub fn score_invocation(
        &self,
        namespace: &str,
        row: &[rmodels_schema::FieldValue],
    ) -> Result<String, ScriptError> {
        Ok(format!(
            "{}$score({})",
            symbol(namespace),
            self.row_literal(row)?
        ))
    }
}

/// Calls the namespace's export function.
#[must_use]
pub fn export_invocation(namespace: &str) -> String {
    format!("{}$export.artifact()", symbol(namespace))
}

/// Rebinds a staged namespace under its final name and drops the staged name.
#[must_use]
pub fn commit_program(staged: &str, namespace: &str) -> String {
    let mut script = RScript::new();
    script
        .assign(symbol(namespace), symbol(staged))
        .line(format_args!("rm(list = {})", RLiteral::text(staged)))
        .line("invisible(NULL)");
    script.finish()
}

/// Removes a namespace binding if it exists.
#[must_use]
pub fn teardown_program(namespace: &str) -> String {
    let name = RLiteral::text(namespace);
    format!("if (exists({name}, inherits = FALSE)) rm(list = {name})\ninvisible(NULL)\n")
}

#[cfg(test)]
mod tests {
    use rmodels_schema::{Attribute, FieldValue, ModelConfiguration};

    use super::*;
    use crate::generator::tests::credit;

    #[test]
    fn scoring_function_matches_layout() {
        let config = credit();
        let generator = ScriptGenerator::new(&config).unwrap();
        let expected = "\
m1$score <- local(function(v) {
  v <- as.data.frame(t(as.matrix(v)), stringsAsFactors = FALSE)
  names(v) <- attribute.names
  for (i in numeric.columns) v[[i]] <- as.numeric(v[[i]])
  for (i in factor.columns) v[[i]] <- as.factor(v[[i]])
  v[[\"A1\"]] <- factor(as.character(v[[\"A1\"]]), levels = training.levels(\"A1\", c(\"a\", \"b\")))
  r <- predict(model, v, type = \"prob\")
  r
}, envir = m1)";
        assert_eq!(generator.scoring_function("m1"), expected);
    }

    #[test]
    fn emitted_levels_follow_configured_order_every_time() {
        let config = ModelConfiguration::new(
            vec![
                Attribute::categorical("colour", ["red", "green", "blue", rmodels_schema::UNKNOWN_CATEGORY]),
                Attribute::categorical("class", ["no", "yes"]),
            ],
            indexmap::IndexMap::new(),
        )
        .with_class_index(1);
        let first = ScriptGenerator::new(&config).unwrap().scoring_function("m1");
        let second = ScriptGenerator::new(&config).unwrap().scoring_function("m1");
        assert_eq!(first, second);
        assert!(first.contains(r#"training.levels("colour", c("red", "green", "blue"))"#));
    }

    #[test]
    fn sanitized_names_agree_between_list_and_relevel() {
        let config = ModelConfiguration::new(
            vec![
                Attribute::categorical("9lives", ["x", "y"]),
                Attribute::numeric("_weight"),
                Attribute::categorical("class", ["0", "1"]),
            ],
            indexmap::IndexMap::new(),
        )
        .with_class_index(2);
        let generator = ScriptGenerator::new(&config).unwrap();
        let plan = generator
            .namespace_plan("m1", Path::new("a.model"), Path::new("a.pmml"), None)
            .unwrap();
        assert_eq!(plan.attribute_names, vec!["X9lives", "X_weight"]);
        assert!(plan.functions.contains(r#"v[["X9lives"]] <- factor(as.character(v[["X9lives"]])"#));
        assert_eq!(plan.numeric_columns, vec![2]);
        assert_eq!(plan.factor_columns, vec![1]);
    }

    #[test]
    fn plan_loads_artifact_into_binding() {
        let config = credit().with_property(keys::LIBRARIES, "randomForest,pmml");
        let generator = ScriptGenerator::new(&config).unwrap();
        let plan = generator
            .namespace_plan(
                "m1_staged",
                Path::new("/store/m1.model"),
                Path::new("/store/m1.pmml"),
                Some("helper <- function(x) x\n"),
            )
            .unwrap();
        let expected_setup = "\
library(randomForest)
library(pmml)
m1_staged <- new.env()
m1_staged$model.name <- load(file = \"/store/m1.model\", envir = m1_staged)
m1_staged$model <- get(m1_staged$model.name[1], envir = m1_staged)
invisible(NULL)
";
        assert_eq!(plan.setup, expected_setup);
        let helper = plan.functions.find("local({\n  helper <- function(x) x\n}, envir = m1_staged)");
        let score = plan.functions.find("m1_staged$score <- ");
        assert!(helper.unwrap() < score.unwrap());
        assert!(plan
            .functions
            .contains("table <- tryCatch(model$forest$xlevels, error = function(e) NULL)"));
        assert!(plan.functions.ends_with("invisible(NULL)\n"));
    }

    #[test]
    fn custom_prediction_arguments_and_transform() {
        let config = credit()
            .with_property(keys::PREDICT_FUNCTION_ARGUMENTS, "type = \"vote\", norm.votes = TRUE")
            .with_property(keys::PREDICT_RESULT_TRANSFORM, "as.vector(r)")
            .with_property(keys::LEVELS_TABLE, "xlevels");
        let generator = ScriptGenerator::new(&config).unwrap();
        let score = generator.scoring_function("m1");
        assert!(score.contains("r <- predict(model, v, type = \"vote\", norm.votes = TRUE)\n  r <- as.vector(r)\n  r\n"));
        assert!(generator.levels_helper("m1").unwrap().contains("model$xlevels"));
    }

    #[test]
    fn rejects_malformed_levels_table() {
        let config = credit().with_property(keys::LEVELS_TABLE, "forest$xlevels; q()");
        assert!(matches!(
            ScriptGenerator::new(&config),
            Err(ScriptError::InvalidProperty { key: keys::LEVELS_TABLE, .. })
        ));
    }

    #[test]
    fn export_function_annotates_class_index() {
        let config = credit();
        let generator = ScriptGenerator::new(&config).unwrap();
        let export = generator.export_function("m1", Path::new("/store/m1.pmml"));
        assert!(export.starts_with("m1$export.artifact <- local(function() {\n  p <- pmml::pmml(model)\n"));
        assert!(export.contains(r#"attrs = c(name = "classIndex", value = "2")"#));
        assert!(export.contains(r#"XML::saveXML(p, file = "/store/m1.pmml")"#));
        assert_eq!(export_invocation("m1"), "m1$export.artifact()");
    }

    #[test]
    fn score_invocation_renders_row() {
        let config = credit();
        let generator = ScriptGenerator::new(&config).unwrap();
        let call = generator
            .score_invocation("m1", &["a".into(), FieldValue::Number(3.5)])
            .unwrap();
        assert_eq!(call, r#"m1$score(c("a", 3.5))"#);
    }

    #[test]
    fn commit_and_teardown_programs() {
        assert_eq!(
            commit_program("m1_staged", "m1"),
            "m1 <- m1_staged\nrm(list = \"m1_staged\")\ninvisible(NULL)\n"
        );
        assert_eq!(
            teardown_program("m1"),
            "if (exists(\"m1\", inherits = FALSE)) rm(list = \"m1\")\ninvisible(NULL)\n"
        );
    }
}
