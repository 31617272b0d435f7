use std::collections::VecDeque;

/// Fixed-capacity buffer: pushing past `maxsize` evicts the oldest item.
#[derive(Debug, Clone)]
pub struct RollingBuffer<T> {
	items: VecDeque<T>,
	maxsize: usize,
}

impl<T> RollingBuffer<T> {
	/// `maxsize` is clamped to at least 1.
	pub fn new(maxsize: usize) -> Self {
		let maxsize = maxsize.max(1);
		Self {
			items: VecDeque::with_capacity(maxsize.min(1024)),
			maxsize,
		}
	}

	pub fn push(&mut self, item: T) {
		if self.items.len() >= self.maxsize {
			self.items.pop_front();
		}
		self.items.push_back(item);
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn maxsize(&self) -> usize {
		self.maxsize
	}

	pub fn iter(&self) -> impl Iterator<Item = &T> {
		self.items.iter()
	}

	pub fn clear(&mut self) {
		self.items.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rolls_at_one() {
		let mut buf = RollingBuffer::new(1);
		buf.push("1");
		assert_eq!(buf.iter().collect::<Vec<_>>(), vec![&"1"]);
		buf.push("2");
		assert_eq!(buf.iter().collect::<Vec<_>>(), vec![&"2"]);
	}

	#[test]
	fn keeps_newest_in_append_order() {
		for maxsize in 1..6 {
			let mut buf = RollingBuffer::new(maxsize);
			for i in 0..20 {
				buf.push(i);
				assert!(buf.len() <= maxsize);
			}
			let expected: Vec<i32> = (20 - maxsize as i32..20).collect();
			assert_eq!(buf.iter().copied().collect::<Vec<_>>(), expected);
		}
	}

	#[test]
	fn zero_is_clamped() {
		let mut buf = RollingBuffer::new(0);
		buf.push('a');
		buf.push('b');
		assert_eq!(buf.maxsize(), 1);
		assert_eq!(buf.len(), 1);
	}
}
