use std::path::Path;

use pointmesh_core::PointBatch;

const DEFAULT_POINT_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    BinaryLittle,
    BinaryBig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl Scalar {
    fn parse(name: &str) -> Result<Self, String> {
        match name {
            "char" | "int8" => Ok(Scalar::Int8),
            "uchar" | "uint8" => Ok(Scalar::Uint8),
            "short" | "int16" => Ok(Scalar::Int16),
            "ushort" | "uint16" => Ok(Scalar::Uint16),
            "int" | "int32" => Ok(Scalar::Int32),
            "uint" | "uint32" => Ok(Scalar::Uint32),
            "float" | "float32" => Ok(Scalar::Float32),
            "double" | "float64" => Ok(Scalar::Float64),
            _ => Err(format!("unsupported PLY property type '{name}'")),
        }
    }

    fn size(self) -> usize {
        match self {
            Scalar::Int8 | Scalar::Uint8 => 1,
            Scalar::Int16 | Scalar::Uint16 => 2,
            Scalar::Int32 | Scalar::Uint32 | Scalar::Float32 => 4,
            Scalar::Float64 => 8,
        }
    }

    /// Divisor that maps a stored colour channel onto `0..=1`.
    fn color_scale(self) -> f32 {
        match self {
            Scalar::Uint8 | Scalar::Int8 => 255.0,
            Scalar::Uint16 | Scalar::Int16 => 65_535.0,
            _ => 1.0,
        }
    }

    fn read(self, bytes: &[u8], little_endian: bool) -> f32 {
        macro_rules! decode {
            ($ty:ty, $n:expr) => {{
                let mut raw = [0u8; $n];
                raw.copy_from_slice(&bytes[..$n]);
                if little_endian {
                    <$ty>::from_le_bytes(raw) as f32
                } else {
                    <$ty>::from_be_bytes(raw) as f32
                }
            }};
        }
        match self {
            Scalar::Int8 => bytes[0] as i8 as f32,
            Scalar::Uint8 => bytes[0] as f32,
            Scalar::Int16 => decode!(i16, 2),
            Scalar::Uint16 => decode!(u16, 2),
            Scalar::Int32 => decode!(i32, 4),
            Scalar::Uint32 => decode!(u32, 4),
            Scalar::Float32 => decode!(f32, 4),
            Scalar::Float64 => decode!(f64, 8),
        }
    }
}

#[derive(Debug)]
struct Property {
    name: String,
    scalar: Scalar,
}

#[derive(Debug)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
    has_list: bool,
}

#[derive(Debug)]
struct Header {
    encoding: Encoding,
    elements: Vec<Element>,
}

/// Columns of the vertex element that feed a point batch.
struct Columns {
    position: [usize; 3],
    color: Option<[usize; 3]>,
    alpha: Option<usize>,
}

impl Columns {
    fn locate(vertex: &Element) -> Result<Self, String> {
        let find = |name: &str| vertex.properties.iter().position(|p| p.name == name);
        let (Some(x), Some(y), Some(z)) = (find("x"), find("y"), find("z")) else {
            return Err("PLY is missing position properties (x, y, z)".to_string());
        };
        let color = match (find("red"), find("green"), find("blue")) {
            (Some(r), Some(g), Some(b)) => Some([r, g, b]),
            _ => None,
        };
        Ok(Self {
            position: [x, y, z],
            color,
            alpha: find("alpha"),
        })
    }

    fn point(&self, vertex: &Element, values: &[f32]) -> ([f32; 3], [f32; 4]) {
        let position = self.position.map(|idx| values[idx]);
        let channel = |idx: usize| values[idx] / vertex.properties[idx].scalar.color_scale();
        let color = match self.color {
            Some([r, g, b]) => {
                let a = self.alpha.map_or(1.0, channel);
                [channel(r), channel(g), channel(b), a]
            }
            None => DEFAULT_POINT_COLOR,
        };
        (position, color)
    }
}

pub fn load_point_cloud(path: &Path) -> Result<PointBatch, String> {
    let data = std::fs::read(path).map_err(|err| format!("{}: {err}", path.display()))?;
    parse_point_cloud(&data).map_err(|err| format!("{}: {err}", path.display()))
}

pub fn parse_point_cloud(data: &[u8]) -> Result<PointBatch, String> {
    let (header, body_start) = split_header(data)?;
    let vertex_at = header
        .elements
        .iter()
        .position(|e| e.name == "vertex")
        .ok_or_else(|| "PLY has no vertex element".to_string())?;
    let vertex = &header.elements[vertex_at];
    if vertex.has_list {
        return Err("PLY vertex list properties are not supported".to_string());
    }
    let columns = Columns::locate(vertex)?;
    let preceding = &header.elements[..vertex_at];
    let body = &data[body_start..];

    match header.encoding {
        Encoding::Ascii => {
            let text = std::str::from_utf8(body)
                .map_err(|_| "PLY ASCII data is not UTF-8".to_string())?;
            read_ascii(text, preceding, vertex, &columns)
        }
        Encoding::BinaryLittle => read_binary(body, preceding, vertex, &columns, true),
        Encoding::BinaryBig => read_binary(body, preceding, vertex, &columns, false),
    }
}

fn split_header(data: &[u8]) -> Result<(Header, usize), String> {
    let marker = b"end_header";
    let mut line_start = 0usize;
    for (idx, byte) in data.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }
        let line = data[line_start..idx].trim_ascii();
        if line == marker {
            let text = std::str::from_utf8(&data[..idx])
                .map_err(|_| "PLY header is not ASCII".to_string())?;
            return Ok((parse_header(text)?, idx + 1));
        }
        line_start = idx + 1;
    }
    Err("PLY header is missing end_header".to_string())
}

fn parse_header(text: &str) -> Result<Header, String> {
    let mut lines = text.lines().map(str::trim);
    if lines.next() != Some("ply") {
        return Err("not a PLY file".to_string());
    }

    let mut encoding = None;
    let mut elements: Vec<Element> = Vec::new();
    for line in lines {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("format") => {
                encoding = Some(match parts.next() {
                    Some("ascii") => Encoding::Ascii,
                    Some("binary_little_endian") => Encoding::BinaryLittle,
                    Some("binary_big_endian") => Encoding::BinaryBig,
                    other => return Err(format!("unknown PLY format {other:?}")),
                });
            }
            Some("element") => {
                let name = parts.next().unwrap_or_default().to_string();
                let count = parts
                    .next()
                    .and_then(|c| c.parse::<usize>().ok())
                    .ok_or_else(|| format!("malformed PLY element '{line}'"))?;
                elements.push(Element {
                    name,
                    count,
                    properties: Vec::new(),
                    has_list: false,
                });
            }
            Some("property") => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| "PLY property before any element".to_string())?;
                match parts.next() {
                    Some("list") => element.has_list = true,
                    Some(kind) => {
                        let scalar = Scalar::parse(kind)?;
                        let name = parts
                            .next()
                            .ok_or_else(|| "PLY property missing name".to_string())?;
                        element.properties.push(Property {
                            name: name.to_string(),
                            scalar,
                        });
                    }
                    None => return Err("PLY property missing type".to_string()),
                }
            }
            _ => {}
        }
    }

    let encoding = encoding.ok_or_else(|| "PLY format not specified".to_string())?;
    Ok(Header { encoding, elements })
}

fn read_ascii(
    text: &str,
    preceding: &[Element],
    vertex: &Element,
    columns: &Columns,
) -> Result<PointBatch, String> {
    let skip = preceding
        .iter()
        .try_fold(0usize, |total, e| total.checked_add(e.count))
        .ok_or_else(|| "PLY element counts are too large".to_string())?;
    let mut rows = text.lines().filter(|line| !line.trim().is_empty()).skip(skip);
    // Every row takes at least two bytes, whatever the header claims.
    let capacity = vertex.count.min(text.len() / 2);
    let mut positions = Vec::with_capacity(capacity);
    let mut colors = Vec::with_capacity(capacity);
    let mut values = Vec::with_capacity(vertex.properties.len());

    for _ in 0..vertex.count {
        let row = rows
            .next()
            .ok_or_else(|| "unexpected end of PLY vertex data".to_string())?;
        values.clear();
        for token in row.split_whitespace() {
            let value = token
                .parse::<f32>()
                .map_err(|_| format!("invalid PLY value '{token}'"))?;
            values.push(value);
        }
        if values.len() < vertex.properties.len() {
            return Err("PLY vertex row has too few values".to_string());
        }
        let (position, color) = columns.point(vertex, &values);
        positions.push(position);
        colors.push(color);
    }
    Ok(PointBatch::new(positions, colors))
}

fn read_binary(
    body: &[u8],
    preceding: &[Element],
    vertex: &Element,
    columns: &Columns,
    little_endian: bool,
) -> Result<PointBatch, String> {
    let mut cursor = 0usize;
    for element in preceding {
        if element.has_list {
            return Err(format!(
                "cannot skip PLY element '{}' with list properties",
                element.name
            ));
        }
        let stride: usize = element.properties.iter().map(|p| p.scalar.size()).sum();
        cursor = stride
            .checked_mul(element.count)
            .and_then(|len| len.checked_add(cursor))
            .ok_or_else(|| format!("PLY element '{}' is too large", element.name))?;
    }

    let stride: usize = vertex.properties.iter().map(|p| p.scalar.size()).sum();
    let needed = stride
        .checked_mul(vertex.count)
        .and_then(|len| len.checked_add(cursor))
        .ok_or_else(|| "PLY vertex data is too large".to_string())?;
    if needed > body.len() {
        return Err("unexpected end of binary PLY data".to_string());
    }

    let mut positions = Vec::with_capacity(vertex.count);
    let mut colors = Vec::with_capacity(vertex.count);
    let mut values = vec![0.0f32; vertex.properties.len()];
    for record in body[cursor..needed].chunks_exact(stride.max(1)) {
        let mut offset = 0;
        for (value, property) in values.iter_mut().zip(&vertex.properties) {
            let size = property.scalar.size();
            *value = property.scalar.read(&record[offset..offset + size], little_endian);
            offset += size;
        }
        let (position, color) = columns.point(vertex, &values);
        positions.push(position);
        colors.push(color);
    }
    Ok(PointBatch::new(positions, colors))
}
