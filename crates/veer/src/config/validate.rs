//! Raw configuration to validated [`Configuration`].
//!
//! Every shape error is reported here, at startup, with the ordinal of the
//! offending mapping. Nothing in the validated form can fail to resolve at
//! request time except I/O.

use super::mapping::{MatchSpec, RawMapping};
use super::model::{
    CachingStrategy, Configuration, CustomTarget, FileTarget, HandlerKind, Mapping, MappingState,
    StatusTarget, UrlTarget, UseTarget,
};
use super::registry::HandlerRegistry;
use super::RawConfig;
use crate::errors::{Error, Result};
use crate::handlers::{CaptureSinkFactory, DiskCapture};
use crate::matcher::{MethodFilter, Pattern, PrefixPattern, RegexPattern};
use crate::template::value_has_placeholders;
use hyper::StatusCode;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Pattern used when a mapping has no `match`.
pub const CATCH_ALL: &str = "(.*)";

pub fn validate(raw: RawConfig, registry: &HandlerRegistry) -> Result<Configuration> {
    if raw.event_capacity == 0 {
        return Err(Error::InvalidConfiguration {
            reason: "event-capacity must be at least 1".to_string(),
        });
    }
    let cwd = match raw.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().map_err(|e| Error::InvalidConfiguration {
            reason: format!("cannot determine working directory: {e}"),
        })?,
    };

    let mappings = raw
        .mappings
        .into_iter()
        .enumerate()
        .map(|(index, mapping)| validate_mapping(index, mapping, &cwd, registry))
        .collect::<Result<Vec<_>>>()?;
    let states = mappings.iter().map(|_| MappingState::default()).collect();

    debug!(
        mappings = mappings.len(),
        max_redirects = raw.max_redirects,
        cwd = %cwd.display(),
        "Configuration validated"
    );

    Ok(Configuration {
        mappings,
        max_redirects: raw.max_redirects,
        cwd,
        listeners: raw.listeners,
        event_capacity: raw.event_capacity,
        states,
    })
}

fn invalid(index: usize, reason: impl Into<String>) -> Error {
    Error::InvalidMapping {
        index,
        reason: reason.into(),
    }
}

fn validate_mapping(
    index: usize,
    raw: RawMapping,
    default_cwd: &Path,
    registry: &HandlerRegistry,
) -> Result<Mapping> {
    let pattern = compile_pattern(index, &raw)?;
    let methods = match &raw.method {
        Some(spec) => MethodFilter::parse(spec.tokens())
            .map_err(|token| invalid(index, format!("invalid method '{token}'")))?,
        None => MethodFilter::any(),
    };
    let cwd = match &raw.cwd {
        Some(cwd) => default_cwd.join(cwd),
        None => default_cwd.to_path_buf(),
    };
    let handler = resolve_handler(index, raw.clone_options(), &raw, &cwd, registry)?;

    Ok(Mapping {
        index,
        pattern,
        methods,
        handler,
        ignore_if_not_found: raw.ignore_if_not_found,
        cwd,
    })
}

fn compile_pattern(index: usize, raw: &RawMapping) -> Result<Arc<dyn Pattern>> {
    match (&raw.predicate, &raw.match_spec) {
        (Some(_), Some(_)) => Err(invalid(index, "both a predicate and a match are set")),
        (Some(predicate), None) => Ok(predicate.clone()),
        (None, Some(MatchSpec::Prefix { prefix })) => Ok(Arc::new(PrefixPattern::new(prefix.clone()))),
        (None, Some(MatchSpec::Regex(source))) => compile_regex(index, source),
        (None, None) => compile_regex(index, CATCH_ALL),
    }
}

fn compile_regex(index: usize, source: &str) -> Result<Arc<dyn Pattern>> {
    RegexPattern::new(source)
        .map(|pattern| Arc::new(pattern) as Arc<dyn Pattern>)
        .map_err(|e| Error::InvalidPattern {
            index,
            pattern: source.to_string(),
            reason: e.to_string(),
        })
}

impl RawMapping {
    fn clone_options(&self) -> Value {
        self.options.clone().unwrap_or(Value::Null)
    }

    fn kinds(&self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        if self.file.is_some() {
            kinds.push("file");
        }
        if self.url.is_some() {
            kinds.push("url");
        }
        if self.custom.is_some() || self.custom_handler.is_some() {
            kinds.push("custom");
        }
        if self.status.is_some() {
            kinds.push("status");
        }
        if self.use_name.is_some() || self.middleware.is_some() {
            kinds.push("use");
        }
        kinds
    }
}

fn resolve_handler(
    index: usize,
    options: Value,
    raw: &RawMapping,
    cwd: &Path,
    registry: &HandlerRegistry,
) -> Result<HandlerKind> {
    let kinds = raw.kinds();
    let kind = match kinds.as_slice() {
        [kind] => *kind,
        [] => return Err(invalid(index, "no handler set (file, url, custom, status or use)")),
        many => {
            return Err(invalid(
                index,
                format!("exactly one handler must be set, found {}", many.join(", ")),
            ))
        }
    };

    reject_foreign_options(index, kind, raw)?;

    let handler = match kind {
        "file" => HandlerKind::File(FileTarget {
            template: raw.file.clone().unwrap_or_default(),
            caching: caching_strategy(index, raw.caching_strategy.as_deref())?,
            mime_types: raw
                .mime_types
                .iter()
                .map(|(ext, content_type)| {
                    (
                        ext.trim_start_matches('.').to_ascii_lowercase(),
                        content_type.clone(),
                    )
                })
                .collect(),
        }),
        "url" => HandlerKind::Url(UrlTarget {
            template: raw.url.clone().unwrap_or_default(),
            ignore_unverifiable_certificate: raw.ignore_unverifiable_certificate,
            capture: capture_factory(index, raw, cwd)?,
        }),
        "custom" => {
            let handler = match (&raw.custom_handler, &raw.custom) {
                (Some(_), Some(_)) => {
                    return Err(invalid(index, "custom is set both by name and inline"))
                }
                (Some(handler), None) => handler.clone(),
                (None, Some(name)) => registry
                    .custom(name)
                    .ok_or_else(|| invalid(index, format!("unknown custom handler '{name}'")))?,
                (None, None) => return Err(invalid(index, "custom handler missing")),
            };
            HandlerKind::Custom(CustomTarget {
                handler,
                templated: value_has_placeholders(&options),
                options,
            })
        }
        "status" => {
            let code = raw.status.unwrap_or_default();
            let status = u16::try_from(code)
                .ok()
                .filter(|code| (100..=599).contains(code))
                .and_then(|code| StatusCode::from_u16(code).ok())
                .ok_or_else(|| invalid(index, format!("status {code} is outside 100..=599")))?;
            HandlerKind::Status(StatusTarget {
                status,
                headers: raw
                    .headers
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect(),
            })
        }
        _ => {
            let factory = match (&raw.middleware, &raw.use_name) {
                (Some(_), Some(_)) => return Err(invalid(index, "use is set both by name and inline")),
                (Some(factory), None) => factory.clone(),
                (None, Some(name)) => registry
                    .middleware(name)
                    .ok_or_else(|| invalid(index, format!("unknown middleware '{name}'")))?,
                (None, None) => return Err(invalid(index, "middleware missing")),
            };
            HandlerKind::Use(UseTarget {
                factory,
                templated: value_has_placeholders(&options),
                options,
            })
        }
    };
    Ok(handler)
}

/// Kind-specific options are rejected on every other kind.
fn reject_foreign_options(index: usize, kind: &str, raw: &RawMapping) -> Result<()> {
    let checks: [(&str, bool, &[&str]); 6] = [
        ("caching-strategy", raw.caching_strategy.is_some(), &["file"]),
        ("mime-types", !raw.mime_types.is_empty(), &["file"]),
        ("headers", !raw.headers.is_empty(), &["status"]),
        (
            "capture",
            raw.capture.is_some() || raw.capture_sink.is_some(),
            &["url"],
        ),
        (
            "ignore-unverifiable-certificate",
            raw.ignore_unverifiable_certificate,
            &["url"],
        ),
        ("options", raw.options.is_some(), &["custom", "use"]),
    ];
    for (option, present, allowed) in checks {
        if present && !allowed.contains(&kind) {
            return Err(invalid(
                index,
                format!("option '{option}' does not apply to {kind} mappings"),
            ));
        }
    }
    Ok(())
}

fn caching_strategy(index: usize, value: Option<&str>) -> Result<Option<CachingStrategy>> {
    match value {
        None => Ok(None),
        Some(value) if value.eq_ignore_ascii_case("modified") => Ok(Some(CachingStrategy::Modified)),
        Some(other) => Err(invalid(
            index,
            format!("unknown caching strategy '{other}' (expected 'modified')"),
        )),
    }
}

fn capture_factory(
    index: usize,
    raw: &RawMapping,
    cwd: &Path,
) -> Result<Option<Arc<dyn CaptureSinkFactory>>> {
    match (&raw.capture_sink, &raw.capture) {
        (Some(_), Some(_)) => Err(invalid(index, "capture is set both as a path and inline")),
        (Some(factory), None) => Ok(Some(factory.clone())),
        (None, Some(template)) => Ok(Some(Arc::new(DiskCapture::new(
            template.clone(),
            PathBuf::from(cwd),
        )))),
        (None, None) => Ok(None),
    }
}
