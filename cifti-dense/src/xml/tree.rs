//! 基于 `quick-xml` 事件流的轻量元素树, 以及对称的写出工具.

use std::str::FromStr;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{CiftiError, CiftiResult};

/// XML 元素. 文本内容为所有直接子文本节点的拼接.
#[derive(Debug, Clone, Default)]
pub(crate) struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    fn from_start(e: &BytesStart) -> CiftiResult<Self> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attrs.push((key, value));
        }
        Ok(Self {
            name,
            attrs,
            ..Default::default()
        })
    }

    /// 获取属性值.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 获取必需的属性值.
    pub fn required_attr(&self, key: &str) -> CiftiResult<&str> {
        self.attr(key).ok_or_else(|| {
            CiftiError::parse(format!("元素 <{}> 缺少属性 `{key}`", self.name))
        })
    }

    /// 解析必需的属性值.
    pub fn parse_attr<T: FromStr>(&self, key: &str) -> CiftiResult<T> {
        let raw = self.required_attr(key)?;
        raw.trim().parse().map_err(|_| {
            CiftiError::parse(format!("元素 <{}> 的属性 `{key}` 值 `{raw}` 非法", self.name))
        })
    }

    /// 解析可选的属性值.
    pub fn parse_attr_opt<T: FromStr>(&self, key: &str) -> CiftiResult<Option<T>> {
        match self.attr(key) {
            None => Ok(None),
            Some(_) => self.parse_attr(key).map(Some),
        }
    }

    /// 获取名为 `name` 的子元素.
    pub fn children_named<'a, 'b>(
        &'a self,
        name: &'b str,
    ) -> impl Iterator<Item = &'a Element> + 'b
    where
        'a: 'b,
    {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// 获取至多一个名为 `name` 的子元素. 多于一个时返回 `Err`.
    pub fn unique_child(&self, name: &str) -> CiftiResult<Option<&Element>> {
        let mut it = self.children.iter().filter(|c| c.name == name);
        let first = it.next();
        if it.next().is_some() {
            return Err(CiftiError::parse(format!(
                "元素 <{}> 中出现多个 <{name}>",
                self.name
            )));
        }
        Ok(first)
    }

    /// 检查所有子元素名都在 `allowed` 中.
    pub fn check_children(&self, allowed: &[&str]) -> CiftiResult<()> {
        match self
            .children
            .iter()
            .find(|c| !allowed.contains(&c.name.as_str()))
        {
            Some(c) => Err(CiftiError::parse(format!(
                "元素 <{}> 中出现意外的子元素 <{}>",
                self.name, c.name
            ))),
            None => Ok(()),
        }
    }
}

/// 将整个 XML 文档解析为元素树, 返回根元素.
pub(crate) fn parse_document(bytes: &[u8]) -> CiftiResult<Element> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    // 将完成的元素挂到父元素下, 或作为根元素.
    fn close(
        stack: &mut Vec<Element>,
        root: &mut Option<Element>,
        done: Element,
    ) -> CiftiResult<()> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(done),
            None if root.is_none() => *root = Some(done),
            None => return Err(CiftiError::parse("XML 文档存在多个根元素")),
        }
        Ok(())
    }

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => stack.push(Element::from_start(&e)?),
            Event::Empty(e) => {
                let done = Element::from_start(&e)?;
                close(&mut stack, &mut root, done)?;
            }
            Event::End(_) => {
                // quick-xml 已经校验了结束标签名.
                let done = stack
                    .pop()
                    .ok_or_else(|| CiftiError::parse("XML 结束标签不匹配"))?;
                close(&mut stack, &mut root, done)?;
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(CiftiError::parse("XML 文档意外结束"));
    }
    root.ok_or_else(|| CiftiError::parse("XML 文档为空"))
}

/// 解析以空白分隔的数值列表.
pub(crate) fn parse_numbers<T: FromStr>(text: &str, what: &str) -> CiftiResult<Vec<T>> {
    text.split_whitespace()
        .map(|s| {
            s.parse()
                .map_err(|_| CiftiError::parse(format!("{what} 中的数值 `{s}` 非法")))
        })
        .collect()
}

/// 解析以逗号分隔的数值列表.
pub(crate) fn parse_comma_list<T: FromStr>(text: &str, what: &str) -> CiftiResult<Vec<T>> {
    text.split(',')
        .map(|s| {
            let s = s.trim();
            s.parse()
                .map_err(|_| CiftiError::parse(format!("{what} 中的数值 `{s}` 非法")))
        })
        .collect()
}

/// 写出 XML 的简单封装, 带两空格缩进.
pub(crate) struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    /// 创建写出器, 并写出 XML 声明.
    pub fn new() -> CiftiResult<Self> {
        let mut inner = Writer::new_with_indent(Vec::new(), b' ', 2);
        inner.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(Self { inner })
    }

    /// 写出开始标签.
    pub fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> CiftiResult<()> {
        let mut e = BytesStart::new(name);
        e.extend_attributes(attrs.iter().copied());
        self.inner.write_event(Event::Start(e))?;
        Ok(())
    }

    /// 写出结束标签.
    pub fn end(&mut self, name: &str) -> CiftiResult<()> {
        self.inner.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    /// 写出空元素.
    pub fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> CiftiResult<()> {
        let mut e = BytesStart::new(name);
        e.extend_attributes(attrs.iter().copied());
        self.inner.write_event(Event::Empty(e))?;
        Ok(())
    }

    /// 写出仅包含文本的元素.
    pub fn text_element(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
        text: &str,
    ) -> CiftiResult<()> {
        self.start(name, attrs)?;
        self.inner.write_event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    /// 获取写出的字节.
    pub fn finish(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}
