use crate::normalize::{DeploymentUnit, NormalizedSpec};
use crate::provider::ParameterSource;

/// Render the normalized spec as a deterministic, human-readable plan.
pub fn render_plan(spec: &NormalizedSpec) -> Vec<String> {
    let mut lines = vec![
        format!("Schema:       {}", spec.schema_version),
        format!(
            "Account:      {}",
            spec.subscription_id.as_deref().unwrap_or("<current>")
        ),
        format!("Deployments:  {}", spec.units.len()),
    ];

    for (idx, unit) in spec.units.iter().enumerate() {
        lines.push(format!("  {idx}. {}", format_unit(unit)));
    }
    lines
}

pub fn print_plan(spec: &NormalizedSpec) {
    for line in render_plan(spec) {
        println!("{line}");
    }
}

fn format_unit(unit: &DeploymentUnit) -> String {
    let params = match parameter_hint(unit) {
        ParameterSource::Inline(_) => "inline",
        ParameterSource::File(_) => "file",
        ParameterSource::None => "none",
    };
    let p = &unit.retry_policy;
    format!(
        "{}  rg={}@{} template={} mode={} params={params} retry={}x{}s*{}",
        unit.name,
        unit.resource_group.name,
        unit.resource_group.location,
        unit.template.file.display(),
        unit.mode,
        p.max_attempts,
        p.delay_seconds,
        p.backoff_factor,
    )
}

/// Which parameter channel the unit will likely use, without reading files.
fn parameter_hint(unit: &DeploymentUnit) -> ParameterSource<'_> {
    if !unit.parameters.overrides.is_empty() {
        ParameterSource::Inline(&unit.parameters.overrides)
    } else if let Some(f) = unit.parameters.file.as_deref() {
        ParameterSource::File(f)
    } else {
        ParameterSource::None
    }
}
