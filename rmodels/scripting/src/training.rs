use std::path::Path;

use rmodels_protocol::{symbol, RLiteral};
use rmodels_schema::keys;

use crate::{
    builder::{call, RScript},
    error::ScriptError,
    generator::ScriptGenerator,
};

impl ScriptGenerator<'_> {
    /// Program that trains on the instance dump at `instances` and saves the
    /// fitted object as `model` to `artifact`.
    ///
    /// Everything runs inside `local({...})`, so no binding survives in the
    /// engine's global environment. `custom_code` is the content of the
    /// configured `train.file`, evaluated just before the formula is built.
    pub fn training_script(
        &self,
        instances: &Path,
        artifact: &Path,
        custom_code: Option<&str>,
    ) -> Result<String, ScriptError> {
        let mut script = RScript::new();
        for library in self.libraries()? {
            script.library(&library);
        }
        script.open("local({");
        script.assign(
            "instances",
            call("foreign::read.arff", [path_literal(instances).to_string()]),
        );
        script.assign(
            "names(instances)",
            RLiteral::text_vector(self.engine_names()),
        );
        if let Some(code) = custom_code {
            script.verbatim(code);
        }
        script.assign(
            "formula",
            format_args!("{} ~ .", symbol(&self.class_attribute().engine_name())),
        );
        let extra = self
            .config
            .property(keys::TRAIN_FUNCTION_ARGUMENTS)
            .unwrap_or_default();
        script.assign(
            "model",
            call(
                self.train_function(),
                ["formula", "data = instances", extra],
            ),
        );
        script.line(call(
            "save",
            ["model".to_string(), format!("file = {}", path_literal(artifact))],
        ));
        script.line("invisible(NULL)");
        script.close("})");
        Ok(script.finish())
    }
}

pub(crate) fn path_literal(path: &Path) -> RLiteral {
    RLiteral::text(path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::generator::tests::credit;

    #[test]
    fn emits_training_steps_in_order() {
        let config = credit().with_property(keys::TRAIN_FUNCTION_ARGUMENTS, "ntree = 50");
        let generator = ScriptGenerator::new(&config).unwrap();
        let script = generator
            .training_script(
                &PathBuf::from("/data/training/t1.arff"),
                &PathBuf::from("/data/m1.model"),
                None,
            )
            .unwrap();
        let expected = "\
library(randomForest)
local({
  instances <- foreign::read.arff(\"/data/training/t1.arff\")
  names(instances) <- c(\"A1\", \"A2\", \"class\")
  formula <- class ~ .
  model <- randomForest(formula, data = instances, ntree = 50)
  save(model, file = \"/data/m1.model\")
  invisible(NULL)
})
";
        assert_eq!(script, expected);
    }

    #[test]
    fn uses_configured_libraries_trainer_and_custom_code() {
        let config = credit()
            .with_property(keys::LIBRARIES, "e1071, foreign")
            .with_property(keys::TRAIN_FUNCTION, "svm");
        let generator = ScriptGenerator::new(&config).unwrap();
        let script = generator
            .training_script(
                Path::new("in.arff"),
                Path::new("out.model"),
                Some("instances <- na.omit(instances)\r\n"),
            )
            .unwrap();
        assert!(script.starts_with("library(e1071)\nlibrary(foreign)\n"));
        let custom = script.find("na.omit").unwrap();
        let formula = script.find("formula <-").unwrap();
        assert!(custom < formula);
        assert!(script.contains("model <- svm(formula, data = instances)\n"));
        assert!(!script.contains('\r'));
    }

    #[test]
    fn sanitizes_class_in_formula() {
        let mut config = credit();
        config.attributes[2].name = "1class".into();
        let generator = ScriptGenerator::new(&config).unwrap();
        let script = generator
            .training_script(Path::new("i.arff"), Path::new("o.model"), None)
            .unwrap();
        assert!(script.contains("names(instances) <- c(\"A1\", \"A2\", \"X1class\")"));
        assert!(script.contains("formula <- X1class ~ .\n"));
    }

    #[test]
    fn quotes_paths() {
        let config = credit();
        let generator = ScriptGenerator::new(&config).unwrap();
        let script = generator
            .training_script(Path::new("C:\\data\\in.arff"), Path::new("o.model"), None)
            .unwrap();
        assert!(script.contains(r#"foreign::read.arff("C:\\data\\in.arff")"#));
    }
}
