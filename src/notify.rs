/// スキャン完了の通知先
pub trait Notifier: Send + Sync {
    fn send_completion(&self, matched: usize);
}

/// ログに出すだけの通知
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_completion(&self, matched: usize) {
        tracing::info!("スキャン完了: {} 件がしきい値を超えました", matched);
    }
}
