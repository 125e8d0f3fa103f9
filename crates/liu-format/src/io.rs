//! I/O 抽象层.
//!
//! 为解封装器提供带缓冲的只读字节源. 后端可以是文件、内存或 HTTP 流.
//!
//! 除了常规的大小端整数读取, 还提供 `peek` (看而不取, 用于同步字扫描)
//! 和 `read_bytes` 的长度预检 (防止损坏文件中的超大长度字段触发巨量分配).

use std::io::{self, Read, Seek};
use std::path::Path;

use liu_core::{LiuError, LiuResult};

/// I/O 后端 trait
pub trait IoBackend: Send {
    /// 读取数据, 返回 0 表示到达末尾
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// 定位, 返回新的绝对位置
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64>;
    /// 总大小 (如果可知)
    fn size(&self) -> Option<u64>;
    /// 是否支持随机访问
    fn is_seekable(&self) -> bool;
}

/// 默认缓冲区大小 (64 KB)
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// I/O 上下文
pub struct IoContext {
    inner: Box<dyn IoBackend>,
    buffer: Vec<u8>,
    /// 缓冲区有效数据 [buf_pos, buf_len)
    buf_len: usize,
    buf_pos: usize,
    /// 缓冲区起点在源中的绝对位置
    buf_origin: u64,
}

impl IoContext {
    /// 从 I/O 后端创建上下文
    pub fn new(backend: Box<dyn IoBackend>) -> Self {
        Self {
            inner: backend,
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
            buf_len: 0,
            buf_pos: 0,
            buf_origin: 0,
        }
    }

    /// 从内存数据创建
    pub fn from_memory(data: Vec<u8>) -> Self {
        Self::new(Box::new(MemoryBackend::from_data(data)))
    }

    /// 打开本地文件 (只读)
    pub fn open_read(path: impl AsRef<Path>) -> LiuResult<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Ok(Self::new(Box::new(FileBackend::new(file))))
    }

    /// 打开 HTTP/HTTPS 地址
    ///
    /// 后台线程流式下载, 已下载区域内可自由定位.
    #[cfg(feature = "http")]
    pub fn open_url(url: &str) -> LiuResult<Self> {
        log::info!("正在连接: {url}");
        let backend = HttpBackend::open(url)?;
        Ok(Self::new(Box::new(backend)))
    }

    /// 按路径或 URL 打开
    pub fn open(source: &str) -> LiuResult<Self> {
        if source.starts_with("http://") || source.starts_with("https://") {
            #[cfg(feature = "http")]
            return Self::open_url(source);
            #[cfg(not(feature = "http"))]
            return Err(LiuError::Unsupported(format!("未启用 http 特性: {source}")));
        }
        Self::open_read(source)
    }

    // ========================
    // 缓冲管理
    // ========================

    fn buffered(&self) -> usize {
        self.buf_len - self.buf_pos
    }

    /// 保证缓冲区中至少有 `n` 字节可读, 返回实际可读字节数 (遇到末尾时可能小于 n)
    fn fill(&mut self, n: usize) -> LiuResult<usize> {
        if self.buffered() >= n {
            return Ok(self.buffered());
        }
        if n > self.buffer.len() {
            self.buffer.resize(n.next_power_of_two(), 0);
        }
        // 把未读数据移到缓冲区开头
        if self.buf_pos > 0 {
            self.buffer.copy_within(self.buf_pos..self.buf_len, 0);
            self.buf_origin += self.buf_pos as u64;
            self.buf_len -= self.buf_pos;
            self.buf_pos = 0;
        }
        while self.buf_len < n {
            let got = self.inner.read(&mut self.buffer[self.buf_len..])?;
            if got == 0 {
                break;
            }
            self.buf_len += got;
        }
        Ok(self.buffered())
    }

    // ========================
    // 读取方法
    // ========================

    /// 读取恰好 `buf.len()` 字节, 数据不足时返回 Eof
    pub fn read_exact(&mut self, buf: &mut [u8]) -> LiuResult<()> {
        let got = self.read_up_to(buf)?;
        if got < buf.len() {
            return Err(LiuError::Eof);
        }
        Ok(())
    }

    /// 尽量读满 `buf`, 返回实际读到的字节数
    pub fn read_up_to(&mut self, buf: &mut [u8]) -> LiuResult<usize> {
        let mut total = 0;
        while total < buf.len() {
            if self.buffered() == 0 {
                self.buf_origin += self.buf_len as u64;
                self.buf_pos = 0;
                self.buf_len = 0;
                // 大块读取直接绕过缓冲区
                if buf.len() - total >= self.buffer.len() {
                    let got = self.inner.read(&mut buf[total..])?;
                    if got == 0 {
                        break;
                    }
                    self.buf_origin += got as u64;
                    total += got;
                    continue;
                }
                self.buf_len = self.inner.read(&mut self.buffer)?;
                if self.buf_len == 0 {
                    break;
                }
            }
            let n = self.buffered().min(buf.len() - total);
            buf[total..total + n].copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + n]);
            self.buf_pos += n;
            total += n;
        }
        Ok(total)
    }

    /// 查看接下来的 `n` 字节而不消耗, 末尾不足时返回较短的切片
    pub fn peek(&mut self, n: usize) -> LiuResult<&[u8]> {
        let avail = self.fill(n)?.min(n);
        Ok(&self.buffer[self.buf_pos..self.buf_pos + avail])
    }

    /// 读取 1 个字节
    pub fn read_u8(&mut self) -> LiuResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// 读取 u16 小端
    pub fn read_u16_le(&mut self) -> LiuResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// 读取 u32 小端
    pub fn read_u32_le(&mut self) -> LiuResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// 读取 u64 小端
    pub fn read_u64_le(&mut self) -> LiuResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// 读取 u16 大端
    pub fn read_u16_be(&mut self) -> LiuResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// 读取 u32 大端
    pub fn read_u32_be(&mut self) -> LiuResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// 读取 4 字节标签 (FourCC)
    pub fn read_tag(&mut self) -> LiuResult<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 读取指定数量的字节
    ///
    /// 源大小已知时先检查剩余长度, 超出则直接报错而不分配.
    pub fn read_bytes(&mut self, count: usize) -> LiuResult<Vec<u8>> {
        if let Some(remaining) = self.remaining() {
            if count as u64 > remaining {
                return Err(LiuError::InvalidData(format!(
                    "请求读取 {count} 字节, 但源仅剩 {remaining} 字节"
                )));
            }
        }
        let mut buf = vec![0u8; count];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 跳过指定字节数
    pub fn skip(&mut self, count: u64) -> LiuResult<()> {
        let buffered = self.buffered() as u64;
        if count <= buffered {
            self.buf_pos += count as usize;
            return Ok(());
        }
        if self.inner.is_seekable() {
            let target = self.position() + count;
            if let Some(size) = self.size() {
                if target > size {
                    self.seek(io::SeekFrom::Start(size))?;
                    return Err(LiuError::Eof);
                }
            }
            self.seek(io::SeekFrom::Start(target))?;
            return Ok(());
        }
        // 不可定位的源逐块丢弃
        let mut left = count;
        let mut scratch = [0u8; 4096];
        while left > 0 {
            let n = left.min(scratch.len() as u64) as usize;
            let got = self.read_up_to(&mut scratch[..n])?;
            if got == 0 {
                return Err(LiuError::Eof);
            }
            left -= got as u64;
        }
        Ok(())
    }

    // ========================
    // 定位方法
    // ========================

    /// 定位, 落在当前缓冲区内时不触发底层 seek
    pub fn seek(&mut self, pos: io::SeekFrom) -> LiuResult<u64> {
        let target = match pos {
            io::SeekFrom::Start(p) => Some(p),
            io::SeekFrom::Current(off) => self.position().checked_add_signed(off),
            io::SeekFrom::End(_) => None,
        };
        if let Some(t) = target {
            let end = self.buf_origin + self.buf_len as u64;
            if t >= self.buf_origin && t <= end {
                self.buf_pos = (t - self.buf_origin) as usize;
                return Ok(t);
            }
        }
        let abs = match pos {
            io::SeekFrom::Current(off) => {
                let cur = self.position();
                let t = cur.checked_add_signed(off).ok_or_else(|| {
                    LiuError::InvalidArgument(format!("定位越界: {cur} + {off}"))
                })?;
                io::SeekFrom::Start(t)
            }
            other => other,
        };
        let new_pos = self.inner.seek(abs)?;
        self.buf_origin = new_pos;
        self.buf_pos = 0;
        self.buf_len = 0;
        Ok(new_pos)
    }

    /// 当前逻辑位置
    pub fn position(&self) -> u64 {
        self.buf_origin + self.buf_pos as u64
    }

    /// 剩余字节数 (如果可知)
    pub fn remaining(&self) -> Option<u64> {
        self.size().map(|s| s.saturating_sub(self.position()))
    }

    /// 是否已到达末尾
    pub fn is_eof(&mut self) -> LiuResult<bool> {
        Ok(self.fill(1)? == 0)
    }

    /// 是否支持随机访问
    pub fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    /// 源总大小
    pub fn size(&self) -> Option<u64> {
        self.inner.size()
    }
}

// ========================
// 文件后端
// ========================

/// 文件 I/O 后端
struct FileBackend {
    file: std::fs::File,
    size: Option<u64>,
}

impl FileBackend {
    fn new(file: std::fs::File) -> Self {
        let size = file.metadata().ok().map(|m| m.len());
        Self { file, size }
    }
}

impl IoBackend for FileBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

// ========================
// 内存后端
// ========================

/// 内存 I/O 后端, 用于测试和内存中处理
pub struct MemoryBackend {
    data: Vec<u8>,
    pos: usize,
    seekable: bool,
}

impl MemoryBackend {
    /// 从已有数据创建
    pub fn from_data(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            seekable: true,
        }
    }

    /// 模拟不可定位的流式源 (管道, 直播)
    pub fn streaming(data: Vec<u8>) -> Self {
        Self {
            seekable: false,
            ..Self::from_data(data)
        }
    }
}

impl IoBackend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len().saturating_sub(self.pos);
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        if !self.seekable {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "流式源不支持定位"));
        }
        let new_pos = match pos {
            io::SeekFrom::Start(offset) => i128::from(offset),
            io::SeekFrom::End(offset) => self.data.len() as i128 + i128::from(offset),
            io::SeekFrom::Current(offset) => self.pos as i128 + i128::from(offset),
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "定位位置不能为负"));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }
}

// ========================
// HTTP 流式后端
// ========================

#[cfg(feature = "http")]
use parking_lot::{Condvar, Mutex};
#[cfg(feature = "http")]
use std::sync::Arc;

/// 下载线程与读取端共享的状态
#[cfg(feature = "http")]
#[derive(Default)]
struct HttpShared {
    data: Vec<u8>,
    total_size: Option<u64>,
    connected: bool,
    finished: bool,
    aborted: bool,
    error: Option<String>,
}

#[cfg(feature = "http")]
struct HttpBackend {
    shared: Arc<(Mutex<HttpShared>, Condvar)>,
    pos: usize,
    total_size: Option<u64>,
}

#[cfg(feature = "http")]
impl HttpBackend {
    fn open(url: &str) -> LiuResult<Self> {
        let shared = Arc::new((Mutex::new(HttpShared::default()), Condvar::new()));
        let worker = Arc::clone(&shared);
        let url = url.to_string();
        std::thread::Builder::new()
            .name("liu-http".into())
            .spawn(move || http_download(&url, &worker))?;

        let (lock, cvar) = &*shared;
        let mut state = lock.lock();
        while !state.connected {
            cvar.wait(&mut state);
        }
        if let Some(err) = &state.error {
            return Err(LiuError::Io(io::Error::other(err.clone())));
        }
        let total_size = state.total_size;
        drop(state);
        Ok(Self {
            shared,
            pos: 0,
            total_size,
        })
    }
}

#[cfg(feature = "http")]
impl Drop for HttpBackend {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.shared;
        lock.lock().aborted = true;
        cvar.notify_all();
    }
}

#[cfg(feature = "http")]
impl IoBackend for HttpBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock();
        loop {
            if self.pos < state.data.len() {
                let n = buf.len().min(state.data.len() - self.pos);
                buf[..n].copy_from_slice(&state.data[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if state.finished {
                return match &state.error {
                    Some(err) => Err(io::Error::other(err.clone())),
                    None => Ok(0),
                };
            }
            cvar.wait(&mut state);
        }
    }

    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            io::SeekFrom::Start(offset) => i128::from(offset),
            io::SeekFrom::Current(offset) => self.pos as i128 + i128::from(offset),
            io::SeekFrom::End(offset) => {
                let size = self.total_size.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::Unsupported, "HTTP 内容长度未知")
                })?;
                i128::from(size) + i128::from(offset)
            }
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "定位位置不能为负"));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }

    fn size(&self) -> Option<u64> {
        self.total_size
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

#[cfg(feature = "http")]
fn http_download(url: &str, shared: &Arc<(Mutex<HttpShared>, Condvar)>) {
    let (lock, cvar) = &**shared;
    let mut response = match ureq::get(url).call() {
        Ok(resp) => resp,
        Err(e) => {
            let mut state = lock.lock();
            state.error = Some(format!("HTTP 请求失败: {e}"));
            state.connected = true;
            state.finished = true;
            cvar.notify_all();
            return;
        }
    };
    let content_length = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    {
        let mut state = lock.lock();
        state.total_size = content_length;
        state.connected = true;
        cvar.notify_all();
    }
    log::info!("HTTP 已连接, 内容长度 {content_length:?}");

    let mut reader = response.body_mut().as_reader();
    let mut chunk = vec![0u8; 32 * 1024];
    loop {
        if lock.lock().aborted {
            log::debug!("HTTP 下载被中止");
            return;
        }
        let result = reader.read(&mut chunk);
        let mut state = lock.lock();
        match result {
            Ok(0) => {
                log::info!("HTTP 下载完成, 共 {} 字节", state.data.len());
                state.finished = true;
            }
            Ok(n) => state.data.extend_from_slice(&chunk[..n]),
            Err(e) => {
                log::error!("HTTP 读取错误: {e}");
                state.error = Some(format!("网络读取错误: {e}"));
                state.finished = true;
            }
        }
        let done = state.finished;
        cvar.notify_all();
        if done {
            return;
        }
    }
}
