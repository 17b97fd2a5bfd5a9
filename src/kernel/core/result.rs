// src/kernel/core/result.rs
//! カーネル共通エラーハンドリング
//!
//! コンテキスト情報付きエラーで、デバッグを容易にします。

use core::fmt;

/// カーネル Result 型
pub type KernelResult<T> = Result<T, KernelError>;

/// カーネルエラー（コンテキスト情報付き）
#[derive(Debug, Clone)]
pub struct KernelError {
    kind: ErrorKind,
    context: Option<&'static str>,
}

impl KernelError {
    /// 新しいエラーを作成
    #[inline]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, context: None }
    }

    /// コンテキスト情報付きエラーを作成
    #[inline]
    pub const fn with_context(kind: ErrorKind, ctx: &'static str) -> Self {
        Self {
            kind,
            context: Some(ctx),
        }
    }

    /// エラー種類を取得
    #[inline]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// コンテキストを取得
    #[inline]
    pub const fn context(&self) -> Option<&'static str> {
        self.context
    }

    /// デバイスエラーか確認
    #[inline]
    pub const fn is_device_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Device(_))
    }
}

/// エラー種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// デバイスエラー
    Device(DeviceError),
    /// 不正な引数
    InvalidArgument,
    /// リソースが利用不可
    ResourceUnavailable,
}

/// デバイスエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// 初期化失敗
    InitFailed,
    /// ハードウェアが応答しない
    Timeout,
    /// I/O エラー
    IoError,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Device(e) => write!(f, "Device error: {:?}", e)?,
            ErrorKind::InvalidArgument => write!(f, "Invalid argument")?,
            ErrorKind::ResourceUnavailable => write!(f, "Resource unavailable")?,
        }

        if let Some(ctx) = self.context {
            write!(f, " (context: {})", ctx)?;
        }

        Ok(())
    }
}

impl From<DeviceError> for KernelError {
    #[inline]
    fn from(e: DeviceError) -> Self {
        KernelError::new(ErrorKind::Device(e))
    }
}

impl From<ErrorKind> for KernelError {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        KernelError::new(kind)
    }
}
