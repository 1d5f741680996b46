//! Geometry payloads carried by atomic objects.

use crate::transform::Matrix4;
use serde::{Deserialize, Serialize};

/// A point in 3D space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Point {
    /// Creates a point.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A straight segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// Start point.
    pub start: Point,
    /// End point.
    pub end: Point,
}

/// An open or closed sequence of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    /// Vertices in order.
    pub points: Vec<Point>,
    /// Whether the last vertex connects back to the first.
    pub closed: bool,
}

/// A polygon mesh.
///
/// `faces` uses the counted encoding: each face is its vertex count followed
/// by that many vertex indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    /// Vertex positions.
    pub vertices: Vec<Point>,
    /// Counted face indices.
    pub faces: Vec<u32>,
}

impl Mesh {
    /// Creates a single-triangle mesh.
    pub fn triangle(a: Point, b: Point, c: Point) -> Self {
        Self {
            vertices: vec![a, b, c],
            faces: vec![3, 0, 1, 2],
        }
    }
}

/// Geometry held by an atomic object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    /// A single point.
    Point(Point),
    /// A line segment.
    Line(Line),
    /// A polyline.
    Polyline(Polyline),
    /// A mesh.
    Mesh(Mesh),
}

impl Geometry {
    /// Returns the type name used in conversion reports.
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::Line(_) => "Line",
            Geometry::Polyline(_) => "Polyline",
            Geometry::Mesh(_) => "Mesh",
        }
    }

    /// Applies a transform to every vertex in place.
    pub fn transform(&mut self, matrix: &Matrix4) {
        match self {
            Geometry::Point(p) => *p = matrix.transform_point(*p),
            Geometry::Line(line) => {
                line.start = matrix.transform_point(line.start);
                line.end = matrix.transform_point(line.end);
            }
            Geometry::Polyline(polyline) => {
                for p in &mut polyline.points {
                    *p = matrix.transform_point(*p);
                }
            }
            Geometry::Mesh(mesh) => {
                for p in &mut mesh.vertices {
                    *p = matrix.transform_point(*p);
                }
            }
        }
    }

    /// Returns every vertex of the geometry.
    pub fn vertices(&self) -> Vec<Point> {
        match self {
            Geometry::Point(p) => vec![*p],
            Geometry::Line(line) => vec![line.start, line.end],
            Geometry::Polyline(polyline) => polyline.points.clone(),
            Geometry::Mesh(mesh) => mesh.vertices.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_mesh_vertices() {
        let mut geometry = Geometry::Mesh(Mesh::triangle(
            Point::new(0.0, 0.0, 0.0),
            Point::new(1.0, 0.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
        ));
        geometry.transform(&Matrix4::translation(0.0, 0.0, 5.0));

        assert!(geometry.vertices().iter().all(|p| p.z == 5.0));
        assert_eq!(geometry.type_name(), "Mesh");
    }

    #[test]
    fn transform_line() {
        let mut geometry = Geometry::Line(Line {
            start: Point::new(0.0, 0.0, 0.0),
            end: Point::new(1.0, 0.0, 0.0),
        });
        geometry.transform(&Matrix4::scale(3.0));
        assert_eq!(geometry.vertices()[1], Point::new(3.0, 0.0, 0.0));
    }
}
