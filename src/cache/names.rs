//! Version-scoped partition names.

/// The three partition names for one deployed version.
///
/// Every name embeds the version token; at activation, anything not carrying
/// the current token is garbage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
  /// Versioned umbrella partition (the version report also uses this name).
  pub umbrella: String,
  /// App shell assets primed at install.
  pub statics: String,
  /// Responses captured while serving.
  pub dynamic: String,
}

impl PartitionNames {
  pub fn new(version: &str) -> Self {
    Self {
      umbrella: format!("rolan-ice-cream-{version}"),
      statics: format!("rolan-static-{version}"),
      dynamic: format!("rolan-dynamic-{version}"),
    }
  }

  /// Partitions that survive an activation reclaim.
  pub fn keep_set(&self) -> [&str; 3] {
    [&self.umbrella, &self.statics, &self.dynamic]
  }
}
