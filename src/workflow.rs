// Refinement workflow
//
// Drives the per-chunk control loop: serialize a chunk, call the model,
// clean and decode the response, resolve duplicate ids, merge corrections
// into the global pair list, update terminology memory, checkpoint, and
// compress memory once it outgrows its budget. Chunks are processed
// strictly one at a time because each chunk's prompt depends on the
// memory produced by all prior chunks.

use indicatif::ProgressBar;
use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::chunker::{self, ChunkPolicy};
use crate::codec::{self, PairFormat};
use crate::config::Config;
use crate::error::{RefineError, Result};
use crate::llm::{ChatClient, ChatMessage, ClientFactory};
use crate::memory::{self, GlobalMemory};
use crate::pair::{self, SubtitlePair};
use crate::prompts;
use crate::recovery;
use crate::stats::{self, UsageStats};
use crate::subtitle;
use crate::tokens::estimate_tokens;

/// Per-run options that do not belong in the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Start processing at this pair index, preserving earlier pairs from
    /// an existing output file when their ids line up.
    pub resume_index: Option<usize>,
    /// Persist and restore the learned glossary next to the input file.
    pub enable_checkpoint: bool,
}

pub struct RefineWorkflow {
    config: Config,
    format: PairFormat,
    policy: ChunkPolicy,
    main_client: Box<dyn ChatClient>,
    terminology_client: Box<dyn ChatClient>,
}

impl RefineWorkflow {
    pub fn new(config: Config) -> Result<Self> {
        let main_client = ClientFactory::create(&config.api, &config.main_model)?;
        let terminology_client = ClientFactory::create(&config.api, &config.terminology_model)?;
        Self::with_clients(config, main_client, terminology_client)
    }

    /// Construct with explicit clients; the seam the tests use.
    pub fn with_clients(
        config: Config,
        main_client: Box<dyn ChatClient>,
        terminology_client: Box<dyn ChatClient>,
    ) -> Result<Self> {
        // Unknown format names abort here, before any chunk is processed.
        let format = config.format()?;
        let policy = ChunkPolicy::from_config(&config.refine)?;

        Ok(Self {
            config,
            format,
            policy,
            main_client,
            terminology_client,
        })
    }

    /// Refine a single subtitle file.
    pub async fn refine_file<P: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: P,
        options: &RunOptions,
    ) -> Result<()> {
        let input_path = input_path.as_ref();
        let output_path = output_path.as_ref();

        info!(
            "Refining {} -> {} (model {}, format {})",
            input_path.display(),
            output_path.display(),
            self.config.main_model.name,
            self.format.name()
        );

        let mut doc = subtitle::read_ass_file(input_path).await?;
        let mut pairs = subtitle::build_pairs(&doc);
        if pairs.is_empty() {
            return Err(RefineError::Subtitle(format!(
                "No subtitle pairs found in {}",
                input_path.display()
            )));
        }

        let resume_index = self.apply_resume(&mut pairs, output_path, options).await?;

        let mut pairs_to_process: Vec<SubtitlePair> = pairs[resume_index..].to_vec();
        if self.config.refine.dry_run {
            let limit = pairs_to_process.len().min(10);
            info!("[dry run] Limiting to first {} pairs", limit);
            pairs_to_process.truncate(limit);
        }

        // Memory initialization: user glossary from config, learned
        // glossary from the checkpoint when enabled.
        let mut memory = GlobalMemory::new();
        if let Some(glossary_path) = &self.config.refine.user_glossary_file {
            memory.user_glossary = memory::load_user_glossary(glossary_path)?;
            info!(
                "Loaded {} user glossary entries",
                memory.user_glossary.len()
            );
        }

        let checkpoint = options
            .enable_checkpoint
            .then(|| memory::checkpoint_path(input_path));
        if let Some(path) = &checkpoint {
            if let Some(terms) = memory::load_glossary_checkpoint(path) {
                info!(
                    "Restored {} learned glossary entries from {}",
                    terms.len(),
                    path.display()
                );
                memory.glossary = terms;
            }
        }

        // Memory grows over the run, so the prompt overhead is recomputed
        // here rather than cached anywhere.
        let base_prompt_tokens = self.base_prompt_tokens(&memory)?;
        let mut chunks = chunker::chunk_pairs(
            &pairs_to_process,
            &self.policy,
            self.format,
            &self.config.main_model.name,
            base_prompt_tokens,
        )?;
        chunker::log_chunk_statistics(&chunks, self.format, &self.config.main_model.name);

        if let Some(max_chunks) = self.config.refine.max_chunks {
            if max_chunks < chunks.len() {
                info!("Limiting run to first {} of {} chunks", max_chunks, chunks.len());
                chunks.truncate(max_chunks);
            }
        }

        let mut total_usage = UsageStats::default();
        let progress = ProgressBar::new(chunks.len() as u64);

        for (i, chunk) in chunks.iter().enumerate() {
            let started = Instant::now();

            match self.refine_chunk(chunk, &memory).await {
                Ok((corrected, usage, _raw_response)) => {
                    total_usage.accumulate(&usage);
                    info!(
                        "Chunk {}/{}: {} pairs corrected in {:.1}s ({} prompt + {} completion tokens)",
                        i + 1,
                        chunks.len(),
                        corrected.len(),
                        started.elapsed().as_secs_f64(),
                        usage.prompt_tokens,
                        usage.completion_tokens
                    );

                    apply_corrections(&mut pairs, &corrected);

                    let (updated, terminology_usage) =
                        memory::update_memory(self.terminology_client.as_ref(), memory, &corrected)
                            .await;
                    memory = updated;
                    total_usage.accumulate(&terminology_usage);

                    if let Some(path) = &checkpoint {
                        if let Err(e) = memory::save_glossary_checkpoint(&memory.glossary, path) {
                            warn!("Could not save glossary checkpoint: {}", e);
                        }
                    }

                    if self.config.refine.incremental_output {
                        subtitle::apply_pairs(&mut doc, &pairs);
                        match subtitle::write_ass_file(output_path, &doc).await {
                            Ok(()) => info!(
                                "[incremental] Saved progress through chunk {}/{}",
                                i + 1,
                                chunks.len()
                            ),
                            Err(e) => warn!("[incremental] Failed to save progress: {}", e),
                        }
                    }

                    total_usage
                        .accumulate(&self.maybe_compress(&mut memory, checkpoint.as_deref()).await);
                }
                Err(e) => {
                    log_chunk_failure(i + 1, chunks.len(), &e);
                    progress.inc(1);
                    continue;
                }
            }

            progress.inc(1);
        }
        progress.finish_and_clear();

        subtitle::apply_pairs(&mut doc, &pairs);
        subtitle::write_ass_file(output_path, &doc).await?;
        info!("Output written to {}", output_path.display());

        stats::print_usage_report(&total_usage, &self.config.pricing);
        Ok(())
    }

    /// Refine every .ass file under a directory, continuing past failures.
    pub async fn refine_directory<P: AsRef<Path>>(
        &self,
        input_dir: P,
        output_dir: Option<P>,
        options: &RunOptions,
    ) -> Result<()> {
        let input_dir = input_dir.as_ref();
        if !input_dir.is_dir() {
            return Err(RefineError::Config(
                "Input path is not a directory".to_string(),
            ));
        }
        let output_dir = match &output_dir {
            Some(dir) => dir.as_ref().to_path_buf(),
            None => input_dir.to_path_buf(),
        };
        tokio::fs::create_dir_all(&output_dir).await?;

        let mut subtitle_files = Vec::new();
        for entry in WalkDir::new(input_dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_ass = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("ass"));
            let is_output = path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.ends_with(".refined"));
            if is_ass && !is_output {
                subtitle_files.push(path.to_path_buf());
            }
        }
        info!("Found {} subtitle files to refine", subtitle_files.len());

        for input in subtitle_files {
            let output = output_path_for(&input, &output_dir);
            match self.refine_file(&input, &output, options).await {
                Ok(()) => info!("Successfully refined: {}", input.display()),
                Err(e) => warn!("Failed to refine {}: {}", input.display(), e),
            }
        }

        Ok(())
    }

    /// One chunk round trip: serialize, call, clean, decode, dedupe.
    ///
    /// Memory is read-only here; the caller threads the updated memory
    /// through the run, which keeps this testable as a pure step.
    pub async fn refine_chunk(
        &self,
        chunk: &[SubtitlePair],
        memory: &GlobalMemory,
    ) -> Result<(Vec<SubtitlePair>, UsageStats, String)> {
        let system_prompt = prompts::build_system_prompt(memory, self.format)?;
        let serialized = codec::serialize(chunk, self.format);
        let user_prompt = prompts::build_user_prompt_for_chunk(&serialized);

        let messages = [
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ];

        let response = if self.config.refine.use_streaming {
            // Display-only callback: pipeline state is touched after the
            // call returns in full.
            let on_delta = |_delta: &str| {
                print!(".");
                let _ = std::io::stdout().flush();
            };
            let response = self
                .main_client
                .complete_streaming(&messages, &on_delta)
                .await?;
            println!();
            response
        } else {
            self.main_client.complete(&messages).await?
        };

        let cleaned = recovery::clean_response(&response.text);
        let decoded = recovery::decode_with_recovery(&cleaned, self.format)?;

        let duplicates = pair::duplicate_ids(&decoded);
        let corrected = if duplicates.is_empty() {
            decoded
        } else {
            warn!(
                "Duplicate pair ids in response: {:?}; keeping last occurrence of each",
                duplicates
            );
            pair::dedupe_keep_last(decoded)
        };

        if corrected.len() != chunk.len() {
            warn!(
                "Expected {} pairs in response, got {}",
                chunk.len(),
                corrected.len()
            );
        }

        Ok((corrected, response.usage, response.text))
    }

    /// Estimate the shared prompt overhead (system prompt with current
    /// memory) used by token-budget chunking.
    fn base_prompt_tokens(&self, memory: &GlobalMemory) -> Result<usize> {
        let system_prompt = prompts::build_system_prompt(memory, self.format)?;
        Ok(estimate_tokens(&system_prompt, &self.config.main_model.name))
    }

    /// Compress memory when it has outgrown its budget. Compression
    /// failure is recoverable: the uncompressed memory is kept.
    async fn maybe_compress(
        &self,
        memory: &mut GlobalMemory,
        checkpoint: Option<&Path>,
    ) -> UsageStats {
        let model = &self.config.main_model.name;
        let limit = self.config.refine.memory_token_limit;
        let current = memory::estimate_memory_tokens(memory, model);
        if current <= limit {
            return UsageStats::default();
        }

        info!("Memory size ({} tokens) exceeds limit {}. Compressing...", current, limit);
        match memory::compress_memory(self.main_client.as_ref(), memory, limit).await {
            Ok((compressed, usage)) => {
                let new_size = memory::estimate_memory_tokens(&compressed, model);
                info!("Memory compressed: {} -> {} tokens", current, new_size);
                *memory = compressed;

                if let Some(path) = checkpoint {
                    if let Err(e) = memory::save_glossary_checkpoint(&memory.glossary, path) {
                        warn!("Could not save compressed glossary checkpoint: {}", e);
                    }
                }
                usage
            }
            Err(e) => {
                warn!("Memory compression failed: {}. Continuing with uncompressed memory", e);
                UsageStats::default()
            }
        }
    }

    /// Validate the resume index and preload already-corrected text from
    /// an existing output file, matched by id at the same position.
    async fn apply_resume(
        &self,
        pairs: &mut [SubtitlePair],
        output_path: &Path,
        options: &RunOptions,
    ) -> Result<usize> {
        let Some(resume_index) = options.resume_index else {
            return Ok(0);
        };

        if resume_index >= pairs.len() {
            return Err(RefineError::Config(format!(
                "Resume index {} exceeds total pairs {}",
                resume_index,
                pairs.len()
            )));
        }

        info!(
            "[resume] Starting from pair index {} of {}",
            resume_index,
            pairs.len()
        );

        if output_path.exists() {
            match subtitle::read_ass_file(output_path).await {
                Ok(existing_doc) => {
                    let existing = subtitle::build_pairs(&existing_doc);
                    let mut preserved = 0;
                    for i in 0..resume_index.min(existing.len()) {
                        if existing[i].id == pairs[i].id {
                            pairs[i].source = existing[i].source.clone();
                            pairs[i].target = existing[i].target.clone();
                            preserved += 1;
                        }
                    }
                    info!("[resume] Preserved {} pairs from existing output", preserved);
                }
                Err(e) => {
                    warn!(
                        "[resume] Could not load existing output, earlier pairs keep input text: {}",
                        e
                    );
                }
            }
        }

        Ok(resume_index)
    }
}

/// Render every chunk's prompts and token estimates to a Markdown file
/// without calling the API. Useful for inspecting requests or timing them
/// with other tools.
pub async fn generate_prompts(config: &Config, input: &Path, output: &Path) -> Result<()> {
    let format = config.format()?;
    let policy = ChunkPolicy::from_config(&config.refine)?;
    let model = &config.main_model.name;

    let doc = subtitle::read_ass_file(input).await?;
    let pairs = subtitle::build_pairs(&doc);
    if pairs.is_empty() {
        return Err(RefineError::Subtitle(format!(
            "No subtitle pairs found in {}",
            input.display()
        )));
    }

    let mut memory = GlobalMemory::new();
    if let Some(glossary_path) = &config.refine.user_glossary_file {
        memory.user_glossary = memory::load_user_glossary(glossary_path)?;
    }

    let system_prompt = prompts::build_system_prompt(&memory, format)?;
    let base_prompt_tokens = estimate_tokens(&system_prompt, model);
    let mut chunks = chunker::chunk_pairs(&pairs, &policy, format, model, base_prompt_tokens)?;
    if let Some(max_chunks) = config.refine.max_chunks {
        chunks.truncate(max_chunks);
    }

    let mut md = String::new();
    md.push_str(&format!("# Request prompts for {}\n\n", input.display()));
    md.push_str("| Chunk | Pairs | System tokens | User tokens | Total |\n");
    md.push_str("|-------|-------|---------------|-------------|-------|\n");

    let mut sections = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let serialized = codec::serialize(chunk, format);
        let user_prompt = prompts::build_user_prompt_for_chunk(&serialized);
        let system_tokens = estimate_tokens(&system_prompt, model);
        let user_tokens = estimate_tokens(&user_prompt, model);

        md.push_str(&format!(
            "| {}/{} | {} | {} | {} | {} |\n",
            i + 1,
            chunks.len(),
            chunk.len(),
            system_tokens,
            user_tokens,
            system_tokens + user_tokens
        ));

        sections.push_str(&format!(
            "\n## Chunk {}/{} ({} pairs)\n\n### System prompt\n\n```\n{}\n```\n\n### User prompt\n\n```\n{}\n```\n",
            i + 1,
            chunks.len(),
            chunk.len(),
            system_prompt,
            user_prompt
        ));
    }
    md.push_str(&sections);

    tokio::fs::write(output, md).await?;
    info!("Prompts written to {}", output.display());
    Ok(())
}

/// Merge corrected pairs into the global list by id.
///
/// Only the text fields at matching ids are overwritten. Corrected ids
/// absent from the global list are ignored, as are global ids without a
/// correction; the global sequence length is authoritative.
pub fn apply_corrections(pairs: &mut [SubtitlePair], corrected: &[SubtitlePair]) {
    let corrections: HashMap<i64, &SubtitlePair> =
        corrected.iter().map(|p| (p.id, p)).collect();

    for pair in pairs.iter_mut() {
        if let Some(correction) = corrections.get(&pair.id) {
            pair.source = correction.source.clone();
            pair.target = correction.target.clone();
        }
    }
}

fn log_chunk_failure(chunk_number: usize, total: usize, e: &RefineError) {
    match e {
        RefineError::RecoveryExhausted {
            reason,
            cleaned_excerpt,
            extracted_excerpt,
        } => {
            error!("Chunk {}/{} failed: {}", chunk_number, total, reason);
            error!("Cleaned response excerpt: {}", cleaned_excerpt);
            if let Some(excerpt) = extracted_excerpt {
                error!("Extracted excerpt: {}", excerpt);
            }
        }
        other => error!("Chunk {}/{} failed: {}", chunk_number, total, other),
    }
    warn!("Skipping chunk {} and continuing", chunk_number);
}

fn output_path_for(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    output_dir.join(format!("{}.refined.ass", stem))
}
