// src/kernel/driver/mod.rs
//! デバイスドライバモジュール

pub mod disk;
#[cfg(target_os = "none")]
pub mod serial;

use core::fmt;

/// デバッグ出力（シリアルポートのみ）
///
/// ホストビルド（std テスト）では出力は破棄されます。
pub fn write_debug(args: fmt::Arguments<'_>) {
    #[cfg(target_os = "none")]
    {
        use core::fmt::Write;
        let _ = serial::SERIAL1.lock().write_fmt(args);
    }
    #[cfg(not(target_os = "none"))]
    let _ = args;
}

/// コンソール出力
///
/// このカーネルには表示ドライバがないため、コンソールはシリアルラインを
/// 共有します。
pub fn write_console(args: fmt::Arguments<'_>) {
    write_debug(args);
}
