use serde::Serialize;
use thiserror::Error as ThisError;

/// Tables a module would create that already exist in the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCollision {
    pub module: String,
    pub tables: Vec<String>,
}

/// Install / remove lifecycle failures.
///
/// Everything except `Hook` is raised before the transaction opens, so the target is untouched.
/// `Hook` carries the failing hook's message unmodified; the transaction has been rolled back.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum RegistryError {
    #[error("The following modules do not exist: {}", .0.join(" , "))]
    UnknownModules(Vec<String>),

    #[error("Missing target name to operate on")]
    MissingTarget,

    #[error("No modules provided")]
    EmptyRequest,

    #[error("Collision with existing tables detected.\n{}", render_collisions(.0))]
    Collision(Vec<TableCollision>),

    #[error("Module {module} depends on {dependency}, which is neither installed nor requested")]
    MissingDependency { module: String, dependency: String },

    #[error("Module {module} is still required by installed module {dependent}")]
    DependentInstalled { module: String, dependent: String },

    #[error("Dependency cycle detected involving module {0}")]
    DependencyCycle(String),

    #[error("Module {module} declares unknown dependency {dependency}")]
    UnknownDependency { module: String, dependency: String },

    #[error("Module {0} is registered twice")]
    DuplicateModule(String),

    #[error("{0}")]
    Hook(String),
}

fn render_collisions(collisions: &[TableCollision]) -> String {
    collisions
        .iter()
        .map(|c| format!("Module {} collides with tables: {}", c.module, c.tables.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::UnknownModules(_) => "UNKNOWN_MODULE",
            RegistryError::MissingTarget | RegistryError::EmptyRequest => "VALIDATION_ERROR",
            RegistryError::Collision(_) => "TABLE_COLLISION",
            RegistryError::MissingDependency { .. } | RegistryError::DependentInstalled { .. } => {
                "DEPENDENCY_ERROR"
            }
            RegistryError::DependencyCycle(_)
            | RegistryError::UnknownDependency { .. }
            | RegistryError::DuplicateModule(_) => "REGISTRY_INVALID",
            RegistryError::Hook(_) => "HOOK_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_modules_are_listed() {
        let err = RegistryError::UnknownModules(vec!["aws_nope".into(), "aws_zzz".into()]);
        assert_eq!(
            err.to_string(),
            "The following modules do not exist: aws_nope , aws_zzz"
        );
    }

    #[test]
    fn collision_lists_module_table_pairs() {
        let err = RegistryError::Collision(vec![
            TableCollision {
                module: "aws_vpc".into(),
                tables: vec!["vpc".into(), "subnet".into()],
            },
            TableCollision {
                module: "aws_sns".into(),
                tables: vec!["topic".into()],
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("Module aws_vpc collides with tables: vpc, subnet"));
        assert!(text.contains("Module aws_sns collides with tables: topic"));
    }
}
