//! Strict template rendering for userdata documents and template files.
//!
//! Templates are Jinja-style and are looked up relative to a search root.
//! Any reference to a variable missing from the mapping fails the render;
//! nothing is ever substituted with an empty string. Base64 payloads of
//! embedded files are marked safe so that auto-escaping never touches them.

use std::collections::{BTreeMap, HashSet};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use minijinja::value::Value as TemplateValue;
use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior};
use thiserror::Error;

use crate::embed::EmbeddedFile;
use crate::overlay::VariableMapping;
use crate::value::{Scalar, Value};

/// Variable under which the server (section) name is injected.
pub const SERVER_NAME_VAR: &str = "server_name";
/// Ordered list of embedded-file keys exposed to templates.
pub const FILES_TO_WRITE_VAR: &str = "files_to_write";
/// Mapping from embedded-file key to its `write_files` record.
pub const WRITE_FILES_VAR: &str = "write_files";

/// Names the engine provides itself; never reported as missing variables.
const ENGINE_GLOBALS: [&str; 4] = ["range", "dict", "debug", "namespace"];

/// Errors raised while rendering a template.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum RenderError {
    /// A variable referenced by the template is absent from the mapping.
    #[error("template `{template}` references undefined variable `{name}`")]
    UndefinedVariable {
        /// Template that failed to render.
        template: Utf8PathBuf,
        /// Dotted name of the missing reference.
        name: String,
    },
    /// The template could not be found or opened.
    #[error("template `{template}` could not be loaded: {message}")]
    NotFound {
        /// Template that was requested.
        template: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// The template is malformed or failed for another reason.
    #[error("template `{template}` failed to render: {message}")]
    Template {
        /// Template that failed to render.
        template: Utf8PathBuf,
        /// Engine error message.
        message: String,
    },
}

/// Renders templates found beneath a search root.
#[derive(Clone, Debug)]
pub struct TemplateRenderer {
    root: Utf8PathBuf,
}

impl TemplateRenderer {
    /// Creates a renderer resolving template paths against `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Search root for templates and file directories.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Renders `template` (relative to the root) against `mapping`.
    ///
    /// When `server_name` is given it is injected as `server_name`,
    /// overriding any variable of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UndefinedVariable`] when the template references
    /// a missing variable, and the other [`RenderError`] variants when the
    /// template cannot be loaded or evaluated.
    pub fn render(
        &self,
        template: &Utf8Path,
        mapping: &VariableMapping,
        server_name: Option<&str>,
    ) -> Result<String, RenderError> {
        let context = template_context(mapping, server_name);
        self.render_value(template, &context)
    }

    fn render_value(
        &self,
        template: &Utf8Path,
        context: &TemplateValue,
    ) -> Result<String, RenderError> {
        let not_found = |message: String| RenderError::NotFound {
            template: template.to_path_buf(),
            message,
        };
        let name = template
            .file_name()
            .ok_or_else(|| not_found(String::from("path has no file name")))?;
        let search_dir = template
            .parent()
            .map_or_else(|| self.root.clone(), |parent| self.root.join(parent));
        let dir = Dir::open_ambient_dir(&search_dir, ambient_authority())
            .map_err(|err| not_found(format!("{search_dir}: {err}")))?;

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(auto_escape_for);
        env.set_loader(move |requested: &str| load_template(&dir, requested));

        let compiled = env.get_template(name).map_err(|err| match err.kind() {
            ErrorKind::TemplateNotFound => not_found(err.to_string()),
            _ => RenderError::Template {
                template: template.to_path_buf(),
                message: err.to_string(),
            },
        })?;

        compiled.render(context).map_err(|err| {
            if err.kind() == ErrorKind::UndefinedError {
                let candidates = compiled
                    .undeclared_variables(true)
                    .into_iter()
                    .collect::<Vec<_>>();
                let in_this_template = err.name().is_none_or(|name| name == compiled.name());
                let failing_expression = err
                    .range()
                    .filter(|_| in_this_template)
                    .and_then(|range| compiled.source().get(range))
                    .and_then(|span| expression_text(span, &candidates));
                let name = first_missing(candidates.clone(), context)
                    .or(failing_expression)
                    .or_else(|| first_root(candidates).filter(|_| in_this_template))
                    .or_else(|| err.detail().map(str::to_owned))
                    .unwrap_or_else(|| String::from("unknown"));
                RenderError::UndefinedVariable {
                    template: template.to_path_buf(),
                    name,
                }
            } else {
                RenderError::Template {
                    template: template.to_path_buf(),
                    message: err.to_string(),
                }
            }
        })
    }
}

/// Builds the template context for `mapping`.
///
/// `files_to_write` and `write_files` are always present, empty when no
/// files were embedded, and take precedence over variables of the same name.
#[must_use]
pub fn template_context(mapping: &VariableMapping, server_name: Option<&str>) -> TemplateValue {
    let mut context: BTreeMap<String, TemplateValue> = mapping
        .variables()
        .iter()
        .map(|(key, value)| (key.clone(), to_template_value(value)))
        .collect();

    let files = mapping.files();
    context.insert(
        String::from(FILES_TO_WRITE_VAR),
        TemplateValue::from(
            files
                .iter()
                .map(|file| TemplateValue::from(file.key.as_str()))
                .collect::<Vec<_>>(),
        ),
    );
    context.insert(
        String::from(WRITE_FILES_VAR),
        TemplateValue::from_iter(
            files
                .iter()
                .map(|file| (file.key.clone(), write_files_record(file))),
        ),
    );

    if let Some(name) = server_name {
        context.insert(String::from(SERVER_NAME_VAR), TemplateValue::from(name));
    }
    TemplateValue::from(context)
}

fn write_files_record(file: &EmbeddedFile) -> TemplateValue {
    let record: BTreeMap<&str, TemplateValue> = BTreeMap::from([
        ("path", TemplateValue::from(file.path.as_str())),
        ("permissions", quoted_or_empty(file.permissions.as_deref())),
        ("owner", quoted_or_empty(file.owner.as_deref())),
        ("append", TemplateValue::from(file.append)),
        (
            "content",
            TemplateValue::from_safe_string(file.content.payload.clone()),
        ),
        ("encoding", TemplateValue::from(file.content.encoding.tag())),
    ]);
    TemplateValue::from(record)
}

fn quoted_or_empty(value: Option<&str>) -> TemplateValue {
    value.map_or_else(
        || TemplateValue::from(""),
        |text| TemplateValue::from_safe_string(format!("\"{text}\"")),
    )
}

fn to_template_value(value: &Value) -> TemplateValue {
    match value {
        Value::Scalar(Scalar::String(text)) => TemplateValue::from(text.as_str()),
        Value::Scalar(Scalar::Integer(number)) => TemplateValue::from(*number),
        Value::Scalar(Scalar::Float(number)) => TemplateValue::from(*number),
        Value::Scalar(Scalar::Boolean(flag)) => TemplateValue::from(*flag),
        Value::Mapping(entries) => TemplateValue::from(
            entries
                .iter()
                .map(|(key, nested)| (key.clone(), to_template_value(nested)))
                .collect::<BTreeMap<_, _>>(),
        ),
        Value::Sequence(items) => {
            TemplateValue::from(items.iter().map(to_template_value).collect::<Vec<_>>())
        }
    }
}

/// Escapes markup only for HTML and XML templates.
fn auto_escape_for(name: &str) -> AutoEscape {
    let lowered = name.to_ascii_lowercase();
    if [".html", ".htm", ".xml"]
        .iter()
        .any(|extension| lowered.ends_with(extension))
    {
        AutoEscape::Html
    } else {
        AutoEscape::None
    }
}

fn load_template(dir: &Dir, name: &str) -> Result<Option<String>, minijinja::Error> {
    let path = Utf8Path::new(name);
    if path.is_absolute() || path.components().any(|part| part.as_str() == "..") {
        return Ok(None);
    }
    match dir.read_to_string(path) {
        Ok(source) => Ok(Some(source)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("failed to read template `{name}`"),
        )
        .with_source(err)),
    }
}

/// Finds the first dotted reference in `candidates` that `context` lacks.
fn first_missing(mut candidates: Vec<String>, context: &TemplateValue) -> Option<String> {
    candidates.sort();
    let known_globals: HashSet<&str> = ENGINE_GLOBALS.into_iter().collect();
    candidates.into_iter().find(|candidate| {
        let mut segments = candidate.split('.');
        let Some(root) = segments.next() else {
            return false;
        };
        if known_globals.contains(root) {
            return false;
        }
        let mut current = match context.get_attr(root) {
            Ok(found) if !found.is_undefined() => found,
            _ => return true,
        };
        for segment in segments {
            current = match current.get_attr(segment) {
                Ok(found) if !found.is_undefined() => found,
                _ => return true,
            };
        }
        false
    })
}

/// Extracts the expression from an error span, accepting it only when it
/// starts with one of the template's variables.
fn expression_text(span: &str, candidates: &[String]) -> Option<String> {
    let mut text = span.trim();
    text = text.strip_prefix("{{").unwrap_or(text);
    text = text.strip_suffix("}}").unwrap_or(text);
    let expression = text.trim_matches(|ch: char| ch == '-' || ch.is_whitespace());
    candidates
        .iter()
        .filter_map(|candidate| candidate.split('.').next())
        .any(|root| {
            expression
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with(['[', '.', '|', ' ']) || rest.is_empty())
        })
        .then(|| expression.to_owned())
}

/// Smallest root name among `candidates`, used when no dotted reference is
/// missing outright (for example a failed subscript).
fn first_root(candidates: Vec<String>) -> Option<String> {
    candidates
        .into_iter()
        .filter_map(|candidate| candidate.split('.').next().map(str::to_owned))
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::EncodedContent;
    use crate::overlay::{VariableOverlay, resolve_overlay};
    use crate::target_path::TargetPath;
    use std::fs;
    use tempfile::TempDir;

    struct TemplateFixture {
        _tmp: TempDir,
        renderer: TemplateRenderer,
    }

    fn fixture_with(files: &[(&str, &str)]) -> TemplateFixture {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        for (name, body) in files {
            let path = tmp.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap_or_else(|err| panic!("mkdir: {err}"));
            }
            fs::write(path, body).unwrap_or_else(|err| panic!("write: {err}"));
        }
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("utf8 tempdir: {}", path.display()));
        TemplateFixture {
            _tmp: tmp,
            renderer: TemplateRenderer::new(root),
        }
    }

    fn mapping(pairs: &[(&str, Value)]) -> VariableMapping {
        let overlay = VariableOverlay::new(
            pairs
                .iter()
                .map(|(key, value)| ((*key).to_owned(), value.clone()))
                .collect(),
        )
        .unwrap_or_else(|err| panic!("overlay: {err}"));
        resolve_overlay(&overlay, None)
    }

    #[test]
    fn renders_variables_and_server_name() {
        let fixture = fixture_with(&[("ud.yaml.jinja", "{{ greeting }} {{ server_name }}")]);
        let rendered = fixture
            .renderer
            .render(
                Utf8Path::new("ud.yaml.jinja"),
                &mapping(&[("greeting", Value::string("hi"))]),
                Some("web1"),
            )
            .unwrap_or_else(|err| panic!("render: {err}"));
        assert_eq!(rendered, "hi web1");
    }

    #[test]
    fn undefined_variable_is_an_error_not_a_blank() {
        let fixture = fixture_with(&[("ud.yaml", "value: {{ missing_thing }}")]);
        let err = fixture
            .renderer
            .render(Utf8Path::new("ud.yaml"), &mapping(&[]), Some("web1"))
            .expect_err("missing variable should fail");
        assert_eq!(
            err,
            RenderError::UndefinedVariable {
                template: Utf8PathBuf::from("ud.yaml"),
                name: String::from("missing_thing"),
            }
        );
    }

    #[test]
    fn undefined_nested_attribute_is_reported_with_its_path() {
        let fixture = fixture_with(&[("ud.yaml", "dns: {{ net.dns }}")]);
        let net = Value::Mapping(BTreeMap::from([(
            String::from("gateway"),
            Value::string("10.0.0.1"),
        )]));
        let err = fixture
            .renderer
            .render(Utf8Path::new("ud.yaml"), &mapping(&[("net", net)]), None)
            .expect_err("missing attribute should fail");
        let RenderError::UndefinedVariable { name, .. } = err else {
            panic!("expected UndefinedVariable, got {err:?}");
        };
        assert_eq!(name, "net.dns");
    }

    #[rstest::rstest]
    #[case::index_out_of_range("{{ items[3] }}")]
    #[case::attribute_of_an_item("{{ items[0].nope }}")]
    fn undefined_subscripts_name_the_failing_reference(#[case] source: &str) {
        let fixture = fixture_with(&[("ud.yaml", source)]);
        let items = Value::Sequence(vec![Value::string("a")]);
        let err = fixture
            .renderer
            .render(Utf8Path::new("ud.yaml"), &mapping(&[("items", items)]), None)
            .expect_err("subscript should be undefined");
        let RenderError::UndefinedVariable { name, .. } = err else {
            panic!("expected UndefinedVariable, got {err:?}");
        };
        assert!(name.starts_with("items"), "reported name: {name}");
    }

    #[test]
    fn server_name_is_undefined_when_not_injected() {
        let fixture = fixture_with(&[("f.conf", "{{ server_name }}")]);
        let err = fixture
            .renderer
            .render(Utf8Path::new("f.conf"), &mapping(&[]), None)
            .expect_err("server_name should be undefined");
        assert!(matches!(err, RenderError::UndefinedVariable { ref name, .. } if name == "server_name"));
    }

    #[test]
    fn templates_resolve_relative_to_their_directory() {
        let fixture = fixture_with(&[
            ("templates/ud.yaml", "{% include 'part.yaml' %}!"),
            ("templates/part.yaml", "part"),
        ]);
        let rendered = fixture
            .renderer
            .render(Utf8Path::new("templates/ud.yaml"), &mapping(&[]), None)
            .unwrap_or_else(|err| panic!("render: {err}"));
        assert_eq!(rendered, "part!");
    }

    #[test]
    fn missing_template_is_reported() {
        let fixture = fixture_with(&[]);
        let err = fixture
            .renderer
            .render(Utf8Path::new("nope.yaml"), &mapping(&[]), None)
            .expect_err("missing template should fail");
        assert!(matches!(err, RenderError::NotFound { .. }), "got {err:?}");
    }

    #[test]
    fn html_templates_escape_plain_variables_only() {
        let fixture = fixture_with(&[("page.html", "{{ markup }}")]);
        let rendered = fixture
            .renderer
            .render(
                Utf8Path::new("page.html"),
                &mapping(&[("markup", Value::string("<b>/</b>"))]),
                None,
            )
            .unwrap_or_else(|err| panic!("render: {err}"));
        assert!(rendered.contains("&lt;b&gt;"), "rendered: {rendered}");
    }

    #[test]
    fn write_files_iterates_in_embedding_order() {
        let fixture = fixture_with(&[(
            "ud.yaml",
            "{% for key in write_files %}{{ key }}={{ write_files[key].path }};{% endfor %}",
        )]);
        let mut vars = mapping(&[]);
        for raw in ["zeta.txt", "alpha.txt"] {
            let path = TargetPath::normalize(raw);
            vars.files_mut()
                .push(EmbeddedFile {
                    key: path.embedding_key(),
                    path,
                    content: EncodedContent::encode(b"x")
                        .unwrap_or_else(|err| panic!("encode: {err}")),
                    permissions: None,
                    owner: None,
                    append: false,
                })
                .unwrap_or_else(|err| panic!("push: {err}"));
        }
        let rendered = fixture
            .renderer
            .render(Utf8Path::new("ud.yaml"), &vars, None)
            .unwrap_or_else(|err| panic!("render: {err}"));
        assert_eq!(rendered, "zeta-txt=zeta.txt;alpha-txt=alpha.txt;");
    }

    #[test]
    fn empty_file_collections_are_always_present() {
        let fixture = fixture_with(&[(
            "ud.yaml",
            "{{ files_to_write | length }}/{{ write_files | length }}",
        )]);
        let rendered = fixture
            .renderer
            .render(Utf8Path::new("ud.yaml"), &mapping(&[]), None)
            .unwrap_or_else(|err| panic!("render: {err}"));
        assert_eq!(rendered, "0/0");
    }
}
