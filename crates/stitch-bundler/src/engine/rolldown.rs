//! Rolldown-backed [`BuildEngine`].
//!
//! The entry is fed as a virtual `<stdin>` module and every other module is
//! resolved and loaded through a single plugin that forwards to the
//! [`ModuleResolver`]. Module ids take the form `namespace:path`. While the
//! hooks run, the plugin records which module imported what so that an
//! esbuild-style metadata graph can be emitted next to the chunks.

use std::borrow::Cow;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rolldown::{
    BundlerBuilder, BundlerOptions, InputItem, OutputFormat as RolldownFormat, Platform,
    RawMinifyOptions, SourceMapType,
};
use rolldown_common::{ImportKind, ModuleType, Output, ResolvedExternal};
use rolldown_plugin::{
    __inner::SharedPluginable, HookLoadArgs, HookLoadOutput, HookLoadReturn, HookResolveIdArgs,
    HookResolveIdOutput, HookResolveIdReturn, HookUsage, Plugin, PluginContext,
};
use rustc_hash::{FxHashMap, FxHasher};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use super::{
    BuildEngine, EngineEntry, EngineFile, EngineLauncher, EngineOutput, EngineRequest, Loader,
    ModuleResolver, OutputFormat, ResolvedModule, STDIN_ID, STDIN_NAME,
};
use crate::bundle::{MetaGraph, MetaImport, MetaInput, MetaOutput, MetaOutputInput};
use crate::config::BuildConfig;
use crate::diagnostics::{self, DiagnosticKind};
use crate::{Error, Result};

/// Starts [`RolldownEngine`]s.
#[derive(Debug, Clone)]
pub struct RolldownLauncher {
    max_concurrent_builds: usize,
}

impl RolldownLauncher {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            max_concurrent_builds: config.max_concurrent_builds,
        }
    }
}

#[async_trait]
impl EngineLauncher for RolldownLauncher {
    async fn launch(&self) -> Result<Arc<dyn BuildEngine>> {
        Ok(Arc::new(RolldownEngine::new(self.max_concurrent_builds)))
    }
}

/// In-process Rolldown engine. Each build gets its own bundler instance;
/// a semaphore bounds how many run at once.
#[derive(Debug)]
pub struct RolldownEngine {
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl RolldownEngine {
    pub fn new(max_concurrent_builds: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent_builds.max(1))),
            shutdown: CancellationToken::new(),
        }
    }

    async fn run(
        &self,
        request: EngineRequest,
        resolver: Arc<dyn ModuleResolver>,
    ) -> Result<EngineOutput> {
        if !request.bundle {
            return Err(Error::InvalidRequest(
                "the engine only supports bundled builds".into(),
            ));
        }

        let _permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(Error::Canceled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| Error::Canceled)?
            }
        };

        let output_dir = request.output_dir.trim_end_matches('/').to_string();
        let plugin = Arc::new(BridgePlugin::new(resolver, &request));
        let plugins: Vec<SharedPluginable> = vec![Arc::clone(&plugin) as SharedPluginable];

        let mut bundler = BundlerBuilder::default()
            .with_options(bundler_options(&request))
            .with_plugins(plugins)
            .build()
            .map_err(|e| Error::from_rolldown_batch(&e))?;

        let generated = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(Error::Canceled),
            generated = bundler.generate() => generated,
        };

        // A hook failure is the root cause of whatever Rolldown reports.
        if let Some(error) = plugin.take_error() {
            return Err(error);
        }
        let bundle = generated.map_err(|e| Error::from_rolldown_batch(&e))?;

        let warnings = bundle
            .warnings
            .iter()
            .map(|warning| diagnostics::extract_warning(warning))
            .collect();

        let mut output_files = collect_files(&bundle.assets, &output_dir);
        let meta = plugin.metadata(&bundle.assets, &output_dir);
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| Error::engine(DiagnosticKind::MissingMetadata, e.to_string()))?;
        let metafile = format!("{output_dir}/{}", request.metafile);
        output_files.push(EngineFile {
            path: metafile.clone(),
            content: meta_json,
        });

        debug!(files = output_files.len(), "engine build finished");
        Ok(EngineOutput {
            warnings,
            output_files,
            metafile: Some(metafile),
        })
    }
}

#[async_trait]
impl BuildEngine for RolldownEngine {
    async fn build(
        &self,
        request: EngineRequest,
        resolver: Arc<dyn ModuleResolver>,
    ) -> Result<EngineOutput> {
        let span = info_span!("rolldown_build", entry = %request.entry.sourcefile);
        self.run(request, resolver).instrument(span).await
    }

    async fn stop(&self) {
        self.shutdown.cancel();
        self.permits.close();
    }
}

fn bundler_options(request: &EngineRequest) -> BundlerOptions {
    let format = match request.format {
        OutputFormat::Esm => RolldownFormat::Esm,
    };
    BundlerOptions {
        input: Some(vec![InputItem {
            name: Some(STDIN_NAME.to_string()),
            import: STDIN_ID.to_string(),
        }]),
        format: Some(format),
        platform: Some(Platform::Browser),
        sourcemap: request.sourcemap.then_some(SourceMapType::File),
        minify: request.minify.then(|| RawMinifyOptions::from(true)),
        inline_dynamic_imports: (!request.splitting).then_some(true),
        define: env_defines(&request.define),
        ..Default::default()
    }
}

type DefineMap = IndexMap<String, String, BuildHasherDefault<FxHasher>>;

/// `process.env.NAME` keys mapped to the JSON string literal of each value.
///
/// Names that are not identifiers cannot be written as a member expression
/// and are skipped.
fn env_defines(env: &IndexMap<String, String>) -> Option<DefineMap> {
    let defines: DefineMap = env
        .iter()
        .filter(|(name, _)| is_identifier(name))
        .map(|(name, value)| {
            (
                format!("process.env.{name}"),
                serde_json::Value::String(value.clone()).to_string(),
            )
        })
        .collect();
    (!defines.is_empty()).then_some(defines)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '_' | '$'))
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$'))
}

/// Chunks, their source maps and any emitted assets, as absolute paths
/// under `output_dir`.
fn collect_files(assets: &[Output], output_dir: &str) -> Vec<EngineFile> {
    let emitted: Vec<String> = assets
        .iter()
        .filter_map(|output| match output {
            Output::Asset(asset) => Some(asset.filename.to_string()),
            Output::Chunk(_) => None,
        })
        .collect();

    let mut files = Vec::with_capacity(assets.len());
    for output in assets {
        match output {
            Output::Chunk(chunk) => {
                files.push(EngineFile {
                    path: format!("{output_dir}/{}", chunk.filename),
                    content: chunk.code.clone(),
                });
                if let (Some(map_name), Some(map)) = (&chunk.sourcemap_filename, &chunk.map) {
                    if !emitted.contains(map_name) {
                        files.push(EngineFile {
                            path: format!("{output_dir}/{map_name}"),
                            content: map.to_json_string(),
                        });
                    }
                }
            }
            Output::Asset(asset) => files.push(EngineFile {
                path: format!("{output_dir}/{}", asset.filename),
                content: String::from_utf8_lossy(asset.source.as_bytes()).into_owned(),
            }),
        }
    }
    files
}

#[derive(Debug)]
struct RecordedImport {
    position: usize,
    specifier: String,
    import: MetaImport,
}

/// What the hooks observed during one build.
#[derive(Debug, Default)]
struct BuildRecord {
    sources: FxHashMap<String, String>,
    imports: FxHashMap<String, Vec<RecordedImport>>,
    error: Option<Error>,
}

impl BuildRecord {
    fn record_import(&mut self, importer: &str, specifier: &str, import: MetaImport) {
        let position = self
            .sources
            .get(importer)
            .map_or(usize::MAX, |source| specifier_position(source, specifier));
        let imports = self.imports.entry(importer.to_string()).or_default();
        let duplicate = imports
            .iter()
            .any(|seen| seen.specifier == specifier && seen.import.kind == import.kind);
        if !duplicate {
            imports.push(RecordedImport {
                position,
                specifier: specifier.to_string(),
                import,
            });
        }
    }

    /// Keep the first hook failure and hand Rolldown a plain message.
    fn fail(&mut self, error: Error) -> anyhow::Error {
        let message = error.to_string();
        if self.error.is_none() {
            self.error = Some(error);
        }
        anyhow::anyhow!(message)
    }
}

/// Forwards Rolldown's resolve/load hooks to a [`ModuleResolver`].
struct BridgePlugin {
    resolver: Arc<dyn ModuleResolver>,
    entry: Arc<EngineEntry>,
    record: Arc<Mutex<BuildRecord>>,
}

impl std::fmt::Debug for BridgePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgePlugin")
            .field("entry", &self.entry.sourcefile)
            .finish_non_exhaustive()
    }
}

impl BridgePlugin {
    fn new(resolver: Arc<dyn ModuleResolver>, request: &EngineRequest) -> Self {
        Self {
            resolver,
            entry: Arc::new(request.entry.clone()),
            record: Arc::new(Mutex::new(BuildRecord::default())),
        }
    }

    fn take_error(&self) -> Option<Error> {
        self.record.lock().error.take()
    }

    fn metadata(&self, assets: &[Output], output_dir: &str) -> MetaGraph {
        let record = self.record.lock();

        let mut inputs: IndexMap<String, MetaInput> = record
            .sources
            .iter()
            .map(|(id, source)| {
                let mut recorded: Vec<&RecordedImport> = record
                    .imports
                    .get(id)
                    .map(|imports| imports.iter().collect())
                    .unwrap_or_default();
                recorded.sort_by_key(|import| import.position);
                let input = MetaInput {
                    bytes: source.len(),
                    imports: recorded.into_iter().map(|r| r.import.clone()).collect(),
                };
                (id.clone(), input)
            })
            .collect();
        inputs.sort_keys();

        let mut outputs = IndexMap::new();
        for output in assets {
            match output {
                Output::Chunk(chunk) => {
                    let imports = chunk
                        .imports
                        .iter()
                        .map(|name| chunk_import(output_dir, name, "import-statement"))
                        .chain(
                            chunk
                                .dynamic_imports
                                .iter()
                                .map(|name| chunk_import(output_dir, name, "dynamic-import")),
                        )
                        .collect();
                    let module_inputs = chunk
                        .modules
                        .keys
                        .iter()
                        .zip(chunk.modules.values.iter())
                        .filter(|(id, _)| record.sources.contains_key(&id.to_string()))
                        .map(|(id, module)| {
                            let bytes_in_output = module.code().map_or(0, |code| code.len());
                            (id.to_string(), MetaOutputInput { bytes_in_output })
                        })
                        .collect();
                    let entry_point = chunk
                        .is_entry
                        .then(|| chunk.facade_module_id.as_ref().map(|id| id.to_string()))
                        .flatten();

                    outputs.insert(
                        format!("{output_dir}/{}", chunk.filename),
                        MetaOutput {
                            imports,
                            exports: chunk.exports.iter().map(|e| e.to_string()).collect(),
                            entry_point,
                            inputs: module_inputs,
                            bytes: chunk.code.len(),
                        },
                    );
                    if let (Some(map_name), Some(map)) = (&chunk.sourcemap_filename, &chunk.map) {
                        outputs
                            .entry(format!("{output_dir}/{map_name}"))
                            .or_insert_with(|| MetaOutput {
                                bytes: map.to_json_string().len(),
                                ..MetaOutput::default()
                            });
                    }
                }
                Output::Asset(asset) => {
                    outputs.insert(
                        format!("{output_dir}/{}", asset.filename),
                        MetaOutput {
                            bytes: asset.source.as_bytes().len(),
                            ..MetaOutput::default()
                        },
                    );
                }
            }
        }

        MetaGraph { inputs, outputs }
    }
}

impl Plugin for BridgePlugin {
    fn name(&self) -> Cow<'static, str> {
        "stitch-bridge".into()
    }

    fn register_hook_usage(&self) -> HookUsage {
        HookUsage::ResolveId | HookUsage::Load
    }

    fn resolve_id(
        &self,
        _ctx: &PluginContext,
        args: &HookResolveIdArgs,
    ) -> impl std::future::Future<Output = HookResolveIdReturn> + Send {
        let specifier = args.specifier.to_string();
        let importer = args.importer.map(str::to_string);
        let kind = import_kind_name(args.kind);
        let resolver = Arc::clone(&self.resolver);
        let record = Arc::clone(&self.record);

        async move {
            if importer.is_none() && specifier == STDIN_ID {
                return Ok(Some(HookResolveIdOutput {
                    id: STDIN_ID.into(),
                    external: Some(ResolvedExternal::Bool(false)),
                    ..Default::default()
                }));
            }

            let resolved = match resolver.resolve(&specifier, importer.as_deref()).await {
                Ok(resolved) => resolved,
                Err(error) => return Err(record.lock().fail(error)),
            };
            let (id, external) = match resolved {
                ResolvedModule::Module { namespace, path } => (format!("{namespace}:{path}"), false),
                ResolvedModule::External { path } => (path, true),
            };

            if let Some(importer) = &importer {
                record.lock().record_import(
                    importer,
                    &specifier,
                    MetaImport {
                        path: id.clone(),
                        kind: Some(kind.to_string()),
                        external,
                    },
                );
            }

            Ok(Some(HookResolveIdOutput {
                id: id.into(),
                external: Some(ResolvedExternal::Bool(external)),
                ..Default::default()
            }))
        }
    }

    fn load(
        &self,
        _ctx: &PluginContext,
        args: &HookLoadArgs<'_>,
    ) -> impl std::future::Future<Output = HookLoadReturn> + Send {
        let id = args.id.to_string();
        let resolver = Arc::clone(&self.resolver);
        let entry = Arc::clone(&self.entry);
        let record = Arc::clone(&self.record);

        async move {
            let (contents, loader) = if id == STDIN_ID {
                (entry.contents.clone(), Loader::from_path(&entry.sourcefile))
            } else {
                let Some((namespace, path)) = id.split_once(':') else {
                    return Ok(None);
                };
                match resolver.load(namespace, path).await {
                    Ok(loaded) => (loaded.contents, loaded.loader),
                    Err(error) => return Err(record.lock().fail(error)),
                }
            };

            record.lock().sources.insert(id, contents.clone());

            Ok(Some(HookLoadOutput {
                code: contents.into(),
                module_type: Some(module_type(loader)),
                ..Default::default()
            }))
        }
    }
}

fn chunk_import(output_dir: &str, name: &str, kind: &str) -> MetaImport {
    MetaImport {
        path: format!("{output_dir}/{name}"),
        kind: Some(kind.to_string()),
        external: false,
    }
}

fn import_kind_name(kind: ImportKind) -> &'static str {
    match kind {
        ImportKind::DynamicImport => "dynamic-import",
        ImportKind::Require => "require-call",
        _ => "import-statement",
    }
}

fn module_type(loader: Loader) -> ModuleType {
    match loader {
        Loader::Js => ModuleType::Js,
        Loader::Jsx => ModuleType::Jsx,
        Loader::Ts => ModuleType::Ts,
        Loader::Tsx => ModuleType::Tsx,
        Loader::Json => ModuleType::Json,
        Loader::Css => ModuleType::Css,
    }
}

/// Offset of the first quoted occurrence of `specifier` in `source`.
fn specifier_position(source: &str, specifier: &str) -> usize {
    ['"', '\'', '`']
        .iter()
        .filter_map(|quote| source.find(&format!("{quote}{specifier}{quote}")))
        .min()
        .unwrap_or(usize::MAX)
}
