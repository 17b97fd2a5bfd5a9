// src/kernel/driver/serial.rs
//! Serial ポートドライバ (UART 16550)
//!
//! デバッグ出力専用の COM1 実装。

use crate::kernel::core::KernelResult;
use crate::kernel::core::result::DeviceError;
use core::fmt;
use lazy_static::lazy_static;
use spin::Mutex;
use x86_64::instructions::port::{Port, PortReadOnly};

/// Serial ポート (COM1)
pub struct SerialPort {
    data: Port<u8>,
    int_enable: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_status: PortReadOnly<u8>,
}

impl SerialPort {
    /// COM1 を作成 (0x3F8)
    pub const fn com1() -> Self {
        Self {
            data: Port::new(0x3F8),
            int_enable: Port::new(0x3F8 + 1),
            fifo_ctrl: Port::new(0x3F8 + 2),
            line_ctrl: Port::new(0x3F8 + 3),
            modem_ctrl: Port::new(0x3F8 + 4),
            line_status: PortReadOnly::new(0x3F8 + 5),
        }
    }

    /// UART を初期化
    pub fn init(&mut self) -> KernelResult<()> {
        // SAFETY: UART 16550の初期化は標準的なI/Oポート操作のシーケンス。
        // 各ポートアドレス(0x3F8-0x3FC)はUART 16550仕様で定義されており、
        // これらのレジスタへの書き込みは安全。
        unsafe {
            // 割り込み無効化
            self.int_enable.write(0x00);
            // 9600 baud, 8N1 設定
            self.line_ctrl.write(0x80);
            self.data.write(0x03);
            self.int_enable.write(0x00);
            self.line_ctrl.write(0x03);
            // FIFO 有効化
            self.fifo_ctrl.write(0xC7);
            // DTR/RTS 設定
            self.modem_ctrl.write(0x0B);
        }
        Ok(())
    }

    /// 送信バッファが空か確認
    fn is_tx_empty(&mut self) -> bool {
        // SAFETY: line_statusポート(0x3FD)からの読み取りは、UART 16550の標準
        // レジスタ操作であり、ビット5は送信ホールディングレジスタが空かどうかを
        // 示す標準的なステータスビット。
        unsafe { self.line_status.read() & 0x20 != 0 }
    }

    /// 1バイト送信（タイムアウト付き）
    pub fn write_byte(&mut self, byte: u8) -> KernelResult<()> {
        const TIMEOUT: usize = 100_000;
        for _ in 0..TIMEOUT {
            if self.is_tx_empty() {
                // SAFETY: 送信バッファが空であることを確認済み。dataポートへの
                // 書き込みはUART 16550の標準的な送信手順。
                unsafe {
                    self.data.write(byte);
                }
                return Ok(());
            }
            core::hint::spin_loop();
        }
        // タイムアウト: シリアルポートが応答しない
        Err(DeviceError::Timeout.into())
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte).map_err(|_| fmt::Error)?;
        }
        Ok(())
    }
}

lazy_static! {
    /// グローバル COM1 インスタンス
    pub static ref SERIAL1: Mutex<SerialPort> = {
        let mut port = SerialPort::com1();
        let _ = port.init();
        Mutex::new(port)
    };
}
