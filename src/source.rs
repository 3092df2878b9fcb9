//! Raw node and way records, and the readers that stream them out of map
//! extracts. Every scan reopens the file: nothing is buffered between passes.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;
use osmpbfreader::{OsmObj, OsmPbfReader, Tags};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};
use crate::geometry::Coordinate;

pub type NodeId = i64;

#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub id: NodeId,
    pub coord: Coordinate,
}

#[derive(Clone, Debug)]
pub struct WayRecord {
    pub id: i64,
    pub node_ids: Vec<NodeId>,
    pub tags: Tags,
}

#[derive(Clone, Debug)]
pub enum Element {
    Node(NodeRecord),
    Way(WayRecord),
}

/// Which records a scan wants; the other kind is skipped before conversion.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElementKind {
    Nodes,
    Ways,
}

impl ElementKind {
    fn wants(self, element: &Element) -> bool {
        matches!(
            (self, element),
            (ElementKind::Nodes, Element::Node(_)) | (ElementKind::Ways, Element::Way(_))
        )
    }
}

/// A re-scannable stream of records. Each call to `scan` is one full,
/// in-order pass over the source and ends at end of stream.
pub trait ElementSource {
    fn describe(&self) -> String;

    fn scan(&self, kind: ElementKind, visit: &mut dyn FnMut(Element)) -> Result<()>;
}

/// In-memory records, in the order given.
impl ElementSource for Vec<Element> {
    fn describe(&self) -> String {
        format!("{} in-memory records", self.len())
    }

    fn scan(&self, kind: ElementKind, visit: &mut dyn FnMut(Element)) -> Result<()> {
        for element in self.iter().filter(|element| kind.wants(element)) {
            visit(element.clone());
        }
        Ok(())
    }
}

pub struct PbfSource {
    path: PathBuf,
}

impl PbfSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ElementSource for PbfSource {
    fn describe(&self) -> String {
        format!("pbf {}", self.path.display())
    }

    fn scan(&self, kind: ElementKind, visit: &mut dyn FnMut(Element)) -> Result<()> {
        let file = File::open(&self.path).map_err(|err| Error::io(&self.path, err))?;
        let mut pbf = OsmPbfReader::new(file);

        // Blocks are decoded in parallel but handed back in file order.
        for obj in pbf.par_iter() {
            let obj = obj.map_err(|err| Error::parse(&self.path, err))?;
            match (kind, obj) {
                (ElementKind::Nodes, OsmObj::Node(node)) => visit(Element::Node(NodeRecord {
                    id: node.id.0,
                    coord: Coordinate::new(node.lat(), node.lon()),
                })),
                (ElementKind::Ways, OsmObj::Way(way)) => visit(Element::Way(WayRecord {
                    id: way.id.0,
                    node_ids: way.nodes.iter().map(|node_id| node_id.0).collect(),
                    tags: way.tags,
                })),
                _ => {}
            }
        }
        Ok(())
    }
}

pub struct XmlSource {
    path: PathBuf,
}

impl XmlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn node_record(&self, event: &BytesStart<'_>) -> Result<NodeRecord> {
        Ok(NodeRecord {
            id: self.parsed_attr(event, b"id")?,
            coord: Coordinate::new(
                self.parsed_attr(event, b"lat")?,
                self.parsed_attr(event, b"lon")?,
            ),
        })
    }

    fn way_record(&self, event: &BytesStart<'_>) -> Result<WayRecord> {
        Ok(WayRecord {
            id: self.parsed_attr(event, b"id")?,
            node_ids: Vec::new(),
            tags: Tags::new(),
        })
    }

    /// A required attribute parsed as `T`; missing or unparsable values are
    /// parse errors.
    fn parsed_attr<T>(&self, event: &BytesStart<'_>, key: &[u8]) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let element = String::from_utf8_lossy(event.name().as_ref()).into_owned();
        let key = String::from_utf8_lossy(key).into_owned();
        let value = self
            .attr_value(event, key.as_bytes())?
            .ok_or_else(|| Error::parse(&self.path, format!("<{element}> without {key}")))?;
        value.parse::<T>().map_err(|err| {
            Error::parse(
                &self.path,
                format!("<{element}> has invalid {key} {value:?}: {err}"),
            )
        })
    }

    fn attr_value(&self, event: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
        for attr in event.attributes().with_checks(false) {
            let attr = attr.map_err(|err| Error::parse(&self.path, err))?;
            if attr.key.as_ref() == key {
                let value = attr
                    .unescape_value()
                    .map_err(|err| Error::parse(&self.path, err))?;
                return Ok(Some(value.to_string()));
            }
        }
        Ok(None)
    }

    /// Handles `nd` and `tag` children of the way currently being read.
    fn way_child(&self, event: &BytesStart<'_>, way: &mut WayRecord) -> Result<()> {
        match event.name().as_ref() {
            b"nd" => way.node_ids.push(self.parsed_attr(event, b"ref")?),
            b"tag" => {
                let key = self.attr_value(event, b"k")?;
                let value = self.attr_value(event, b"v")?;
                if let (Some(key), Some(value)) = (key, value) {
                    way.tags.insert(key.into(), value.into());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl ElementSource for XmlSource {
    fn describe(&self) -> String {
        format!("osm xml {}", self.path.display())
    }

    fn scan(&self, kind: ElementKind, visit: &mut dyn FnMut(Element)) -> Result<()> {
        let file = File::open(&self.path).map_err(|err| Error::io(&self.path, err))?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        reader.trim_text(true);

        let mut current_way: Option<WayRecord> = None;
        let mut buf = Vec::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|err| Error::parse(&self.path, err))?;
            match event {
                Event::Eof => break,
                Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"node" => {
                    if kind == ElementKind::Nodes {
                        visit(Element::Node(self.node_record(&e)?));
                    }
                }
                Event::Start(e) if e.name().as_ref() == b"way" => {
                    if kind == ElementKind::Ways {
                        current_way = Some(self.way_record(&e)?);
                    }
                }
                Event::Empty(e) if e.name().as_ref() == b"way" => {
                    if kind == ElementKind::Ways {
                        visit(Element::Way(self.way_record(&e)?));
                    }
                }
                Event::Start(e) | Event::Empty(e) => {
                    if let Some(way) = current_way.as_mut() {
                        self.way_child(&e, way)?;
                    }
                }
                Event::End(e) if e.name().as_ref() == b"way" => {
                    if let Some(way) = current_way.take() {
                        visit(Element::Way(way));
                    }
                }
                _ => {}
            }
            buf.clear();
        }

        if current_way.is_some() {
            return Err(Error::parse(&self.path, "unterminated <way> element"));
        }
        Ok(())
    }
}

/// Picks a reader by file extension: `.osm` is OSM XML, anything else is
/// treated as PBF. Fails with an I/O error when the file cannot be opened.
pub fn open_source(path: &Path) -> Result<Box<dyn ElementSource>> {
    File::open(path).map_err(|err| Error::io(path, err))?;
    let ext = path.extension().and_then(|value| value.to_str());
    let source: Box<dyn ElementSource> = match ext {
        Some("osm") => Box::new(XmlSource::new(path)),
        _ => Box::new(PbfSource::new(path)),
    };
    debug!("opened {}", source.describe());
    Ok(source)
}
