//! Quadtree spatial index over bounding rectangles
//!
//! Items are stored at the deepest node whose bounds fully contain their rectangle. A node
//! subdivides into four children once it holds more than [`NODE_CAPACITY`] items, and items
//! that straddle a child boundary stay at the parent.

use crate::geometry::{rect_contains, rect_union, rects_intersect};
use geo::{Coord, Rect};

/// Maximum depth of the quadtree to prevent infinite recursion
const MAX_DEPTH: u32 = 16;

/// Number of items a leaf holds before it subdivides
const NODE_CAPACITY: usize = 16;

/// Root container for the quadtree spatial index
#[derive(Debug, Clone)]
pub struct Quadtree<T> {
    root: QuadtreeNode<T>,
    len: usize,
}

/// A single node of the quadtree
#[derive(Debug, Clone)]
struct QuadtreeNode<T> {
    /// Bounds of this node
    bounding_box: Rect<f64>,
    /// Depth level in the tree (0 = root)
    level: u32,
    /// Items stored at this node with their rectangles
    items: Vec<(Rect<f64>, T)>,
    /// Child nodes (NW, NE, SW, SE) if subdivided
    children: Option<Box<[QuadtreeNode<T>; 4]>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<T> Quadtree<T> {
    /// Create a new empty quadtree covering `bounds`
    ///
    /// Items outside the bounds can still be inserted; they are kept at the root.
    pub fn new(bounds: Rect<f64>) -> Self {
        Self {
            root: QuadtreeNode::new(bounds, 0),
            len: 0,
        }
    }

    /// Build a quadtree from items, sizing the root to their union
    pub fn from_items(items: Vec<(Rect<f64>, T)>) -> Self {
        let bounds = items
            .iter()
            .map(|(r, _)| *r)
            .reduce(rect_union)
            .unwrap_or_else(|| Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }));

        let mut tree = Self::new(bounds);
        for (rect, item) in items {
            tree.insert(rect, item);
        }
        tree
    }

    /// Insert an item with its bounding rectangle
    pub fn insert(&mut self, rect: Rect<f64>, item: T) {
        self.root.insert(rect, item);
        self.len += 1;
    }

    /// All items whose rectangle intersects `area` (boundaries inclusive)
    pub fn query(&self, area: Rect<f64>) -> Vec<&T> {
        let mut results = Vec::new();
        self.root.query(area, &mut results);
        results
    }

    /// Bounds of the root node
    pub fn bounds(&self) -> Rect<f64> {
        self.root.bounding_box
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Depth of the deepest node
    pub fn depth(&self) -> u32 {
        self.root.depth()
    }
}

impl<T> QuadtreeNode<T> {
    fn new(bounding_box: Rect<f64>, level: u32) -> Self {
        Self {
            bounding_box,
            level,
            items: Vec::new(),
            children: None,
        }
    }

    /// Subdivide this node into 4 children
    fn subdivide(&mut self) {
        if self.children.is_some() {
            return;
        }

        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let mid_x = (min.x + max.x) / 2.0;
        let mid_y = (min.y + max.y) / 2.0;
        let level = self.level + 1;

        let nw = QuadtreeNode::new(
            Rect::new(Coord { x: min.x, y: mid_y }, Coord { x: mid_x, y: max.y }),
            level,
        );
        let ne = QuadtreeNode::new(
            Rect::new(Coord { x: mid_x, y: mid_y }, Coord { x: max.x, y: max.y }),
            level,
        );
        let sw = QuadtreeNode::new(
            Rect::new(Coord { x: min.x, y: min.y }, Coord { x: mid_x, y: mid_y }),
            level,
        );
        let se = QuadtreeNode::new(
            Rect::new(Coord { x: mid_x, y: min.y }, Coord { x: max.x, y: mid_y }),
            level,
        );

        self.children = Some(Box::new([nw, ne, sw, se]));

        // Push down what fits into a single child
        let items = std::mem::take(&mut self.items);
        for (rect, item) in items {
            self.insert(rect, item);
        }
    }

    fn child_for(&mut self, rect: Rect<f64>) -> Option<&mut QuadtreeNode<T>> {
        self.children
            .as_mut()?
            .iter_mut()
            .find(|child| rect_contains(child.bounding_box, rect))
    }

    fn insert(&mut self, rect: Rect<f64>, item: T) {
        if self.children.is_none()
            && self.items.len() >= NODE_CAPACITY
            && self.level < MAX_DEPTH
        {
            self.subdivide();
        }

        match self.child_for(rect) {
            Some(child) => child.insert(rect, item),
            None => self.items.push((rect, item)),
        }
    }

    fn query<'a>(&'a self, area: Rect<f64>, results: &mut Vec<&'a T>) {
        // Items at the root may lie outside the node bounds
        if self.level > 0 && !rects_intersect(self.bounding_box, area) {
            return;
        }

        results.extend(
            self.items
                .iter()
                .filter(|(rect, _)| rects_intersect(*rect, area))
                .map(|(_, item)| item),
        );

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query(area, results);
            }
        }
    }

    fn depth(&self) -> u32 {
        match &self.children {
            Some(children) => children.iter().map(|c| c.depth()).max().unwrap_or(self.level),
            None => self.level,
        }
    }
}
