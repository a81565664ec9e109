pub struct Icons;

impl Icons {
    pub const ROCKET: &str = "🚀";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const DATABASE: &str = "🗄️";
    pub const SEED: &str = "🌱";
    pub const DEL: &str = "🗑️";
    pub const REUSE: &str = "♻️";
    pub const CLOCK: &str = "⏱️";
    pub const LOG: &str = "📜";
    pub const EMPTY: &str = "∅";
}
