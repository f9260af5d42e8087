use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vault-scan")]
#[command(about = "写真フォルダのセンシティブ画像スキャン・テキスト墨消しツール", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// 対象の写真フォルダ
#[derive(Args, Clone, Debug)]
pub struct LibraryArgs {
    /// 写真フォルダのパス
    #[arg(required = true)]
    pub folder: PathBuf,

    /// サブフォルダも再帰的に扱う
    #[arg(short = 'r', long)]
    pub recursive: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 新しいスキャンを最初から開始
    Scan {
        #[command(flatten)]
        library: LibraryArgs,

        /// 信頼度しきい値 (0-100、省略時は設定値)
        #[arg(short, long)]
        threshold: Option<i64>,
    },

    /// 中断したスキャンを再開（なければ開始）
    Resume {
        #[command(flatten)]
        library: LibraryArgs,

        /// 信頼度しきい値。保存時と異なる場合は最初からやり直し
        #[arg(short, long)]
        threshold: Option<i64>,
    },

    /// スキャンの進捗を表示
    Status {
        #[command(flatten)]
        library: LibraryArgs,
    },

    /// しきい値を超えた画像の一覧
    Selected {
        #[command(flatten)]
        library: LibraryArgs,
    },

    /// 保存済みのスキャン状態を削除
    Reset {
        #[command(flatten)]
        library: LibraryArgs,
    },

    /// 画像内のテキストをぼかし、元画像と置き換える
    Redact {
        #[command(flatten)]
        library: LibraryArgs,

        /// 対象アイテムID（フォルダからの相対パス）
        #[arg(required = true)]
        item: String,

        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },

    /// 領域ごとにテキストを抽出
    Text {
        #[command(flatten)]
        library: LibraryArgs,

        /// 対象アイテムID
        #[arg(required = true)]
        item: String,

        /// 正規化領域 x,y,w,h[,label]（複数指定可、省略時は画像全体）
        #[arg(long = "region")]
        regions: Vec<String>,

        /// 検出器が出力した領域のJSONファイル
        #[arg(long)]
        regions_json: Option<PathBuf>,
    },

    /// バックグラウンド実行（期限切れ時は保存して再予約）
    Background {
        #[command(flatten)]
        library: LibraryArgs,

        /// 信頼度しきい値
        #[arg(short, long)]
        threshold: Option<i64>,
    },

    /// 利用統計を表示
    Stats,

    /// 設定を表示/編集
    Config {
        /// 設定を表示
        #[arg(long)]
        show: bool,

        /// 既定のしきい値を設定
        #[arg(long)]
        set_threshold: Option<i64>,
    },
}
