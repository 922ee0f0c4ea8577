//! 远程只读后端.
//!
//! 协议: 每个请求都是一个 HTTP POST 表单, 固定参数 `type=dconn`, 再加上 URL
//! 自带的查询参数. 附加参数之一:
//!
//! - `metadata=`: 返回 CIFTI XML;
//! - `row-index=<r>`: 返回第 `r` 行;
//! - `column-index=<c>`: 返回第 `c` 列.
//!
//! 数据响应为 4 字节小端 `i32` 元素个数, 随后为同样个数的小端 `f32`.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::Url;

use super::{check_column, row_number, RowStorage};
use crate::config::RemoteConfig;
use crate::error::{CiftiError, CiftiResult};
use crate::xml::CiftiXml;

/// 远程后端. 只支持二维矩阵.
#[derive(Debug)]
pub struct RemoteStorage {
    client: Client,
    url: Url,
    base_args: Vec<(String, String)>,
    auth: RemoteConfig,
    dims: Vec<usize>,
}

/// 解码数据响应.
///
/// `expected` 为 `None` 时 (维度探测), 只要求个数为正.
pub(crate) fn decode_reply(bytes: &[u8], expected: Option<usize>) -> CiftiResult<Vec<f32>> {
    if bytes.len() < 4 {
        return Err(CiftiError::BadReply(format!("响应只有 {} 字节", bytes.len())));
    }
    let count = LittleEndian::read_i32(&bytes[..4]);
    let count = usize::try_from(count)
        .map_err(|_| CiftiError::BadReply(format!("元素个数 {count} 为负")))?;
    match expected {
        Some(n) if n != count => {
            return Err(CiftiError::BadReply(format!("期望 {n} 个元素, 实际为 {count}")));
        }
        None if count == 0 => return Err(CiftiError::BadReply("维度探测返回了 0 个元素".into())),
        _ => {}
    }
    let body = &bytes[4..];
    if body.len() != count * 4 {
        return Err(CiftiError::BadReply(format!(
            "声明 {count} 个元素, 但数据有 {} 字节",
            body.len()
        )));
    }
    let mut values = vec![0f32; count];
    LittleEndian::read_f32_into(body, &mut values);
    Ok(values)
}

impl RemoteStorage {
    /// 连接远程数据, 同时返回 CIFTI XML.
    ///
    /// XML 中长度未确定的维度通过一次 `row-index=0` (第 0 维) 或
    /// `column-index=0` (第 1 维) 请求获知.
    pub fn open(url: &str, auth: &RemoteConfig) -> CiftiResult<(Self, CiftiXml)> {
        let mut url =
            Url::parse(url).map_err(|e| CiftiError::parse(format!("URL `{url}` 非法: {e}")))?;
        let mut base_args = vec![("type".to_owned(), "dconn".to_owned())];
        base_args.extend(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())));
        url.set_query(None);

        let mut this = Self {
            client: Client::builder().build()?,
            url,
            base_args,
            auth: auth.clone(),
            dims: Vec::new(),
        };

        let mut xml = CiftiXml::from_bytes(&this.post(("metadata", String::new()))?)?;
        if xml.number_of_dims() != 2 {
            return Err(CiftiError::WrongRank {
                expected: 2,
                found: xml.number_of_dims(),
            });
        }
        for dim in xml.unresolved_dims() {
            let key = if dim == 0 { "row-index" } else { "column-index" };
            let reply = this.post((key, "0".to_owned()))?;
            let len = decode_reply(&reply, None)?.len();
            warn!("{}: 第 {dim} 维长度未在 XML 中给出, 由服务端响应确定为 {len}", this.url);
            xml.resolve_length(dim, len);
        }
        this.dims = xml.dims()?;
        debug!("连接远程后端 {} (维度 {:?})", this.url, this.dims);
        Ok((this, xml))
    }

    /// 不含查询参数的 URL.
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn post(&self, extra: (&str, String)) -> CiftiResult<Vec<u8>> {
        let mut form = self.base_args.clone();
        form.push((extra.0.to_owned(), extra.1));

        let mut request = self.client.post(self.url.clone()).form(&form);
        if let Some(user) = &self.auth.username {
            request = request.basic_auth(user, self.auth.password.as_deref());
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(CiftiError::HttpStatus {
                url: self.url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }
}

impl RowStorage for RemoteStorage {
    fn dims(&self) -> &[usize] {
        &self.dims
    }

    fn get_row(&mut self, index_select: &[usize], out: &mut [f32]) -> CiftiResult<()> {
        let row = row_number(&self.dims, index_select, out.len())?;
        let reply = self.post(("row-index", row.to_string()))?;
        out.copy_from_slice(&decode_reply(&reply, Some(out.len()))?);
        Ok(())
    }

    fn get_column(&mut self, index: usize, out: &mut [f32]) -> CiftiResult<()> {
        check_column(&self.dims, index, out.len())?;
        let reply = self.post(("column-index", index.to_string()))?;
        out.copy_from_slice(&decode_reply(&reply, Some(out.len()))?);
        Ok(())
    }

    fn set_row(&mut self, _index_select: &[usize], _data: &[f32]) -> CiftiResult<()> {
        Err(CiftiError::ReadOnly)
    }

    fn set_column(&mut self, _index: usize, _data: &[f32]) -> CiftiResult<()> {
        Err(CiftiError::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};

    use byteorder::{ByteOrder, LittleEndian};

    use super::{decode_reply, RemoteStorage};
    use crate::brain_models::BrainModelIndex;
    use crate::config::RemoteConfig;
    use crate::error::CiftiError;
    use crate::storage::{BackendKind, RowStorage};
    use crate::structure::Structure::*;
    use crate::xml::{CiftiVersion, CiftiXml, IndexMap, SeriesMap, SeriesUnit};
    use crate::DenseFile;

    /// 服务端矩阵: 3 行, 每行 4 个元素.
    const ROWS: usize = 3;
    const ROW_LEN: usize = 4;

    fn value(row: usize, col: usize) -> f32 {
        (row * 10 + col) as f32
    }

    fn dtseries() -> CiftiXml {
        let mut index = BrainModelIndex::new();
        index.add_surface_model(8, CortexLeft, &[1, 3, 5]).unwrap();
        CiftiXml::from_maps(vec![
            IndexMap::Series(SeriesMap::new(ROW_LEN, 0.0, 1.0, SeriesUnit::Second)),
            IndexMap::BrainModels(index),
        ])
    }

    fn auth() -> RemoteConfig {
        RemoteConfig {
            username: Some("guest".into()),
            password: Some("secret".into()),
        }
    }

    /// 处理一个请求, 记录 `Authorization` 头与表单内容.
    fn handle(stream: TcpStream, xml: &[u8], seen: &Mutex<Vec<String>>) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut content_length = 0;
        let mut authorization = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 {
                return;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            let lower = line.to_ascii_lowercase();
            if let Some(v) = lower.strip_prefix("content-length:") {
                content_length = v.trim().parse().unwrap();
            }
            if lower.starts_with("authorization:") {
                authorization = line.to_owned();
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).unwrap();
        let body = String::from_utf8(body).unwrap();
        let args: HashMap<&str, &str> =
            body.split('&').filter_map(|kv| kv.split_once('=')).collect();

        let data_reply = |values: Vec<f32>| {
            let mut bytes = vec![0u8; 4 + values.len() * 4];
            LittleEndian::write_i32(&mut bytes[..4], values.len() as i32);
            LittleEndian::write_f32_into(&values, &mut bytes[4..]);
            bytes
        };
        let index = |key: &str| args.get(key).and_then(|v| v.parse::<usize>().ok());
        let forwarded = args.get("type") == Some(&"dconn") && args.get("token") == Some(&"abc");
        let (status, payload) = if !forwarded {
            ("400 Bad Request", Vec::new())
        } else if args.contains_key("metadata") {
            ("200 OK", xml.to_vec())
        } else if let Some(r) = index("row-index").filter(|&r| r < ROWS) {
            ("200 OK", data_reply((0..ROW_LEN).map(|c| value(r, c)).collect()))
        } else if let Some(c) = index("column-index").filter(|&c| c < ROW_LEN) {
            ("200 OK", data_reply((0..ROWS).map(|r| value(r, c)).collect()))
        } else {
            ("404 Not Found", Vec::new())
        };

        seen.lock().unwrap().push(format!("{authorization} | {body}"));
        let mut stream = stream;
        write!(
            stream,
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            payload.len()
        )
        .unwrap();
        stream.write_all(&payload).unwrap();
    }

    /// 在本地端口启动服务端, 返回其基地址 (不含查询参数) 与请求记录.
    fn serve(xml: Vec<u8>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => handle(stream, &xml, &log),
                    Err(_) => break,
                }
            }
        });
        (format!("http://{addr}/dconn"), seen)
    }

    #[test]
    fn test_open_discovers_unresolved_length() {
        // CIFTI-1 的时间点映射没有长度, 需要一次 row-index=0 请求.
        let (base, seen) = serve(dtseries().to_bytes(CiftiVersion::V1).unwrap());
        let (mut remote, xml) = RemoteStorage::open(&format!("{base}?token=abc"), &auth()).unwrap();
        assert_eq!(xml, dtseries());
        assert_eq!(remote.dims(), &[ROW_LEN, ROWS]);
        assert_eq!(remote.url().query(), None);
        assert!(!remote.is_in_memory());

        let requests = seen.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].ends_with("metadata="));
        assert!(requests[1].ends_with("row-index=0"));
        for r in &requests {
            assert!(r.contains("type=dconn"));
            assert!(r.contains("token=abc"));
            assert!(r.contains("Basic Z3Vlc3Q6c2VjcmV0"));
        }

        let mut row = [0f32; ROW_LEN];
        remote.get_row(&[2], &mut row).unwrap();
        assert_eq!(row, [20.0, 21.0, 22.0, 23.0]);
        let mut col = [0f32; ROWS];
        remote.get_column(1, &mut col).unwrap();
        assert_eq!(col, [1.0, 11.0, 21.0]);

        assert!(matches!(remote.get_row(&[3], &mut row), Err(CiftiError::IndexOutOfRange { .. })));
        assert!(matches!(remote.set_row(&[0], &row), Err(CiftiError::ReadOnly)));
        assert!(matches!(remote.set_column(0, &col), Err(CiftiError::ReadOnly)));
    }

    #[test]
    fn test_open_resolved_without_discovery() {
        let (base, seen) = serve(dtseries().to_bytes(CiftiVersion::V2).unwrap());
        let url = format!("{base}?token=abc");
        let (remote, _) = RemoteStorage::open(&url, &RemoteConfig::default()).unwrap();
        assert_eq!(remote.dims(), &[ROW_LEN, ROWS]);
        let requests = seen.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with(" | "));
    }

    #[test]
    fn test_open_errors() {
        let (base, _) = serve(dtseries().to_bytes(CiftiVersion::V2).unwrap());
        assert!(matches!(
            RemoteStorage::open(&base, &auth()),
            Err(CiftiError::HttpStatus { status: 400, .. })
        ));
        assert!(matches!(RemoteStorage::open("not a url", &auth()), Err(CiftiError::Parse(_))));

        let mut index = BrainModelIndex::new();
        index.add_surface_model_roi(2, CortexRight, None).unwrap();
        let cube = CiftiXml::from_maps(vec![IndexMap::BrainModels(index); 3]);
        let (base, _) = serve(cube.to_bytes(CiftiVersion::V2).unwrap());
        assert!(matches!(
            RemoteStorage::open(&format!("{base}?token=abc"), &auth()),
            Err(CiftiError::WrongRank { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn test_dense_file_over_remote() {
        let (base, _) = serve(dtseries().to_bytes(CiftiVersion::V2).unwrap());
        let mut file = DenseFile::new();
        file.open_url(&format!("{base}?token=abc"), &auth()).unwrap();
        assert_eq!(file.backend_kind(), Some(BackendKind::Remote));
        assert_eq!(file.number_of_rows(), ROWS);

        // 第一次写入时把远程数据复制到内存.
        file.set_row_2d(0, &[-1.0; ROW_LEN]).unwrap();
        assert!(file.is_in_memory());
        let mut row = [0f32; ROW_LEN];
        file.get_row_2d(0, &mut row).unwrap();
        assert_eq!(row, [-1.0; ROW_LEN]);
        file.get_row_2d(1, &mut row).unwrap();
        assert_eq!(row, [10.0, 11.0, 12.0, 13.0]);
    }

    fn reply(count: i32, values: &[f32]) -> Vec<u8> {
        let mut bytes = vec![0u8; 4 + values.len() * 4];
        LittleEndian::write_i32(&mut bytes[..4], count);
        LittleEndian::write_f32_into(values, &mut bytes[4..]);
        bytes
    }

    #[test]
    fn test_decode_reply() {
        let values = [1.0, -0.5, 3.0];
        assert_eq!(decode_reply(&reply(3, &values), Some(3)).unwrap(), values);
        assert_eq!(decode_reply(&reply(3, &values), None).unwrap().len(), 3);
        assert_eq!(decode_reply(&reply(0, &[]), Some(0)).unwrap(), Vec::<f32>::new());
    }

    #[test]
    fn test_bad_replies() {
        let values = [1.0, 2.0];
        let bad = [
            (reply(2, &values), Some(3)),
            (reply(3, &values), Some(3)),
            (reply(-1, &[]), None),
            (reply(0, &[]), None),
            (reply(0, &[]), Some(2)),
            (vec![1, 0], None),
        ];
        for (bytes, expected) in bad {
            assert!(matches!(
                decode_reply(&bytes, expected),
                Err(CiftiError::BadReply(_))
            ));
        }
    }
}
