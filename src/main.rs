use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use vault_scan::classifier::build_classifier;
use vault_scan::cli::{Cli, Commands, LibraryArgs};
use vault_scan::config::Config;
use vault_scan::library::{FolderLibrary, PhotoLibrary};
use vault_scan::notify::LogNotifier;
use vault_scan::ocr::{OcrError, TesseractRecognizer, TextRegionDetector};
use vault_scan::redaction::{RedactionCompositor, RedactionError};
use vault_scan::scan::{
    BackgroundTaskCoordinator, LocalScheduler, ScanOrchestrator, ScanOutcome, ScanSettings,
    ScanStateStore, BACKGROUND_TASK_ID,
};
use vault_scan::statistics::{StatisticsSink, StatisticsStore};
use vault_scan::logging;
use vault_scan_common::{
    parse_region, parse_regions_json, validate_threshold, DetectedRegion, NormalizedRect,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let config = Config::load().context("設定の読み込みに失敗")?;
    let statistics = Arc::new(StatisticsStore::open(&config.state_dir()?));

    match cli.command {
        Commands::Scan { library, threshold } => {
            println!("🔍 vault-scan - スキャン開始\n");
            let threshold = resolve_threshold(threshold, &config)?;
            let orchestrator = build_orchestrator(&config, &library, &statistics)?;
            let _fallback = attach_fallback(&config, &orchestrator, threshold)?;
            let outcome = run_with_progress(&orchestrator, false, threshold).await?;
            print_outcome(&orchestrator, &outcome);
        }

        Commands::Resume { library, threshold } => {
            println!("🔍 vault-scan - スキャン再開\n");
            let threshold = resolve_threshold(threshold, &config)?;
            let orchestrator = build_orchestrator(&config, &library, &statistics)?;
            let _fallback = attach_fallback(&config, &orchestrator, threshold)?;
            let outcome = run_with_progress(&orchestrator, true, threshold).await?;
            print_outcome(&orchestrator, &outcome);
        }

        Commands::Status { library } => {
            let orchestrator = build_orchestrator(&config, &library, &statistics)?;
            let progress = orchestrator.progress();
            println!("スキャン状態:");
            println!("  保存先: {}", orchestrator.store().path().display());
            println!("  進捗: {}/{}", progress.processed, progress.total);
            println!("  一致: {}", progress.matched);
            match orchestrator.store().load() {
                Some(state) => {
                    println!("  しきい値: {}", state.threshold);
                    println!("  完了: {}", if state.completed { "はい" } else { "いいえ" });
                }
                None => println!("  （保存済みのスキャンはありません）"),
            }
        }

        Commands::Selected { library } => {
            let orchestrator = build_orchestrator(&config, &library, &statistics)?;
            let selected = orchestrator.selected_ids();
            if selected.is_empty() {
                println!("しきい値を超えた画像はありません");
            }
            for id in &selected {
                println!("{}", id);
            }
            if !orchestrator.is_completed() && !selected.is_empty() {
                println!("\n（スキャン途中の結果です）");
            }
        }

        Commands::Reset { library } => {
            let orchestrator = build_orchestrator(&config, &library, &statistics)?;
            orchestrator.store().reset()?;
            println!("✔ スキャン状態を削除しました: {}", orchestrator.store().path().display());
        }

        Commands::Redact { library, item, yes } => {
            println!("🖍 vault-scan - テキスト墨消し\n");
            let folder = Arc::new(open_library(&library)?);
            let detector = TextRegionDetector::new(
                Arc::new(TesseractRecognizer::new(&config.ocr)),
                config.redaction.padding,
            );
            let sink: Weak<dyn StatisticsSink> = Arc::downgrade(&statistics) as Weak<dyn StatisticsSink>;
            let compositor = RedactionCompositor::new(
                folder.clone(),
                detector,
                config.redaction.blur_radius,
            )
            .with_statistics(sink);

            let handle = folder
                .fetch_by_id(&item)
                .await
                .with_context(|| format!("アイテムが見つかりません: {}", item))?;
            let image = folder.request_full_image(&handle).await?;
            let regions = match compositor.detect(&image).await {
                Ok(regions) => regions,
                Err(RedactionError::NoTextFound) => {
                    println!("テキストが見つかりませんでした。変更はありません");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            println!("- {} 箇所のテキスト領域を検出", regions.len());

            if !yes {
                let confirmed = Confirm::new()
                    .with_prompt(format!("{} を墨消し画像で置き換えますか？", item))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("中止しました");
                    return Ok(());
                }
            }

            match compositor.redact_and_replace(&item).await {
                Ok(new_id) => println!("✅ 置き換え完了: {} -> {}", item, new_id),
                Err(RedactionError::DeleteFailed { new_id, reason }) => {
                    println!("⚠ 墨消し画像は保存しましたが、元画像を削除できませんでした");
                    println!("  新しい画像: {}", new_id);
                    println!("  理由: {}", reason);
                }
                Err(RedactionError::NoTextFound) => {
                    println!("テキストが見つかりませんでした。変更はありません");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Text { library, item, regions, regions_json } => {
            let folder = open_library(&library)?;
            let regions = collect_regions(&regions, regions_json.as_deref())?;

            let handle = folder
                .fetch_by_id(&item)
                .await
                .with_context(|| format!("アイテムが見つかりません: {}", item))?;
            let image = folder.request_full_image(&handle).await?;

            let detector = TextRegionDetector::new(
                Arc::new(TesseractRecognizer::new(&config.ocr)),
                config.redaction.padding,
            );
            match detector.extract_segments(&image, &regions).await {
                Ok(segments) => {
                    for segment in segments {
                        println!("[{}]", segment.region_id);
                        println!("{}\n", segment.sanitized_text);
                    }
                }
                Err(OcrError::NoTextDetected) => println!("テキストが検出されませんでした"),
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Background { library, threshold } => {
            println!("🌙 vault-scan - バックグラウンドスキャン\n");
            let threshold = resolve_threshold(threshold, &config)?;
            let orchestrator = build_orchestrator(&config, &library, &statistics)?;
            run_background(&config, orchestrator, threshold).await?;
        }

        Commands::Stats => {
            let stats = statistics.snapshot();
            println!("利用統計:");
            println!("  スキャン回数: {}", stats.total_scans);
            println!("  スキャン枚数: {}", stats.photos_scanned);
            println!("  墨消し枚数: {}", stats.photos_redacted);
            match stats.last_scan_date {
                Some(date) => println!("  最終スキャン: {}", date.format("%Y-%m-%d %H:%M")),
                None => println!("  最終スキャン: なし"),
            }
        }

        Commands::Config { show, set_threshold } => {
            let mut config = config;

            if let Some(threshold) = set_threshold {
                config.set_threshold(threshold)?;
                println!("✔ しきい値を {} に設定しました", config.threshold);
            }

            if show || set_threshold.is_none() {
                println!("設定: {}", Config::config_path()?.display());
                println!("  しきい値: {}", config.threshold);
                println!("  バッチサイズ: {}", config.batch_size);
                println!("  最大画像サイズ: {}px", config.max_image_size);
                println!("  タイムアウト: {}秒", config.timeout_seconds);
                println!("  状態の保存先: {}", config.state_dir()?.display());
                println!("  分類器: {:?}", config.classifier);
                println!("  OCR: {}", config.ocr.program);
            }
        }
    }

    Ok(())
}

fn open_library(args: &LibraryArgs) -> Result<FolderLibrary> {
    Ok(FolderLibrary::open(&args.folder)?.recursive(args.recursive))
}

fn resolve_threshold(requested: Option<i64>, config: &Config) -> Result<u8> {
    Ok(requested
        .map(validate_threshold)
        .transpose()?
        .unwrap_or(config.threshold))
}

fn build_orchestrator(
    config: &Config,
    args: &LibraryArgs,
    statistics: &Arc<StatisticsStore>,
) -> Result<ScanOrchestrator> {
    let library = open_library(args)?;
    let store = ScanStateStore::for_library(&config.state_dir()?, library.root());
    let classifier = build_classifier(&config.classifier, config.timeout());

    let orchestrator = ScanOrchestrator::new(
        Arc::new(library),
        classifier,
        store,
        ScanSettings::from_config(config),
        Arc::new(LogNotifier),
    );
    let sink: Weak<dyn StatisticsSink> = Arc::downgrade(statistics) as Weak<dyn StatisticsSink>;
    orchestrator.configure_statistics(sink);
    Ok(orchestrator)
}

/// 前面のスキャンにバックグラウンド再開を紐付ける
///
/// 新規スキャンの開始時に予約し、キャンセル時に取り下げる。戻り値は実行中ずっと保持すること。
fn attach_fallback(
    config: &Config,
    orchestrator: &ScanOrchestrator,
    threshold: u8,
) -> Result<Arc<BackgroundTaskCoordinator>> {
    let scheduler = LocalScheduler::new(config.background.budget());
    let coordinator = BackgroundTaskCoordinator::new(
        Arc::new(scheduler),
        orchestrator.clone(),
        threshold,
        config.background.earliest_start(),
    );
    coordinator.register()?;
    orchestrator.configure_background(&coordinator);
    Ok(coordinator)
}

fn collect_regions(
    specs: &[String],
    json_path: Option<&std::path::Path>,
) -> Result<Vec<DetectedRegion>> {
    let mut regions = Vec::new();
    for (i, spec) in specs.iter().enumerate() {
        regions.push(parse_region(spec, &format!("region-{}", i + 1))?);
    }
    if let Some(path) = json_path {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("領域ファイルを読めません: {}", path.display()))?;
        regions.extend(parse_regions_json(&content)?);
    }
    if regions.is_empty() {
        regions.push(DetectedRegion::new("full", NormalizedRect::new(0.0, 0.0, 1.0, 1.0)));
    }
    Ok(regions)
}

/// プログレスバー付きで実行。Ctrl-C はキャンセルとして扱う
async fn run_with_progress(
    orchestrator: &ScanOrchestrator,
    resume: bool,
    threshold: u8,
) -> Result<ScanOutcome> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} 一致: {msg} ({eta})")?
            .progress_chars("=> "),
    );

    let mut progress = orchestrator.subscribe();
    let watcher_bar = bar.clone();
    let watcher = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let current = *progress.borrow_and_update();
            watcher_bar.set_length(current.total as u64);
            watcher_bar.set_position(current.processed as u64);
            watcher_bar.set_message(current.matched.to_string());
        }
    });

    let canceller = orchestrator.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let outcome = if resume {
        orchestrator.resume_or_start(threshold).await
    } else {
        orchestrator.start(threshold).await
    };

    ctrl_c.abort();
    watcher.abort();
    bar.finish_and_clear();
    Ok(outcome?)
}

fn print_outcome(orchestrator: &ScanOrchestrator, outcome: &ScanOutcome) {
    match outcome {
        ScanOutcome::Completed { matched, total } => {
            let summary = orchestrator
                .store()
                .load()
                .map(|state| state.summary())
                .unwrap_or_else(|| format!("{} images matched", matched));
            println!("✅ スキャン完了 ({}枚): {}", total, summary);
        }
        ScanOutcome::Cancelled { cursor, total } => {
            println!("⏸ 中断しました: {}/{}（resume で再開できます）", cursor, total);
        }
        ScanOutcome::AlreadyRunning => println!("別のスキャンが実行中です"),
        ScanOutcome::AlreadyCompleted { matched } => {
            println!("スキャンは完了済みです（一致 {} 件）。やり直すには scan を使用してください", matched);
        }
    }
}

/// ローカルスケジューラでスキャンが終わるまで実行を繰り返す
async fn run_background(config: &Config, orchestrator: ScanOrchestrator, threshold: u8) -> Result<()> {
    let scheduler = LocalScheduler::new(config.background.budget());
    let coordinator = BackgroundTaskCoordinator::new(
        Arc::new(scheduler.clone()),
        orchestrator.clone(),
        threshold,
        config.background.earliest_start(),
    );
    coordinator.register()?;

    let mut outcomes = scheduler.subscribe();
    coordinator.schedule();
    println!(
        "- {}秒後に開始（1回あたり最大{}秒）",
        config.background.earliest_start_secs, config.background.budget_secs
    );

    loop {
        tokio::select! {
            outcome = outcomes.recv() => match outcome {
                Ok(outcome) => {
                    let progress = orchestrator.progress();
                    println!(
                        "- 実行終了 ({}): {}/{}",
                        if outcome.success { "成功" } else { "未完了" },
                        progress.processed,
                        progress.total
                    );
                    if orchestrator.is_completed() {
                        println!("✅ スキャン完了: 一致 {} 件", progress.matched);
                        break;
                    }
                    if !scheduler.is_pending(BACKGROUND_TASK_ID) && !orchestrator.is_running() {
                        println!("次回の予約がないため終了します");
                        break;
                    }
                    println!("- 再予約済み");
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                coordinator.cancel_all();
                orchestrator.cancel();
                if let Err(e) = orchestrator.checkpoint() {
                    tracing::warn!("チェックポイントの保存に失敗: {}", e);
                }
                println!("\n⏸ 中断しました（resume で再開できます）");
                break;
            }
        }
    }
    Ok(())
}
